//! The evaluation pipeline: from build files on disk to the fully-resolved,
//! topologically-ordered target table a generator consumes.

use crate::error::{Error, Result};
use crate::expand::{self, Phase};
use crate::graph::{self, DependencyGraph, TargetTable};
use crate::loader::{self, FileReader, FileTable};
use crate::merge::merge_dicts;
use crate::paths;
use crate::rules;
use crate::value::{BuildMap, Value, Variables};

/// What the core hands to a generator once every pass has run.
#[derive(Debug, Serialize)]
pub struct ResolvedBuild {
    /// Qualified targets in "dependencies before dependents" order.
    pub flat_list: Vec<String>,
    /// Fully-resolved spec per qualified target.
    pub targets: TargetTable,
    /// Every loaded build file, with its targets in resolved form.
    pub data: FileTable,
}

const DEPENDENT_SETTINGS_KINDS: [&str; 3] = [
    "all_dependent_settings",
    "direct_dependent_settings",
    "link_settings",
];

pub fn resolve(
    reader: &mut dyn FileReader,
    build_files: &[String],
    variables: &Variables,
) -> Result<ResolvedBuild> {
    let mut data = FileTable::new();
    for build_file in build_files {
        loader::load_target_build_file(reader, build_file, &mut data, variables)?;
    }
    debug!("Loaded {} build files", data.len());

    let mut targets = collect_targets(&data)?;
    debug!("Collected {} targets", targets.len());

    // Also qualifies every dependency reference in place.
    let (dependency_graph, flat_list) = graph::build_dependency_graph(&mut targets)?;
    trace!("Build order: {:?}", flat_list);

    merge_file_settings(&data, &mut targets)?;

    for kind in &DEPENDENT_SETTINGS_KINDS {
        propagate_dependent_settings(kind, &flat_list, &mut targets, &dependency_graph)?;
    }

    absorb_static_libraries(&flat_list, &mut targets, &dependency_graph)?;

    // Late phase and rules run in flat_list order so cascaded settings have
    // already arrived when each target is finalized.
    for target in &flat_list {
        let spec = spec_mut(&mut targets, target);
        expand::process_map(spec, Phase::Late, variables.clone())?;
    }
    for target in &flat_list {
        rules::process_rules(target, spec_mut(&mut targets, target))?;
    }

    restore_targets_into_data(&mut data, &targets);

    Ok(ResolvedBuild {
        flat_list,
        targets,
        data,
    })
}

fn spec_mut<'a>(targets: &'a mut TargetTable, name: &str) -> &'a mut BuildMap {
    targets
        .get_mut(name)
        .expect("flat_list entries always exist in the target table")
}

/// Register every target under its qualified name. Specs are copied out of
/// the file table for processing and written back once resolved.
fn collect_targets(data: &FileTable) -> Result<TargetTable> {
    let mut targets = TargetTable::new();
    for (build_file, file_map) in data {
        let list = match file_map.get("targets") {
            None => continue,
            Some(Value::List(list)) => list,
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "targets in {} must be a list, not a {}",
                    build_file,
                    other.type_name()
                )))
            }
        };
        for target in list {
            let spec = match target.as_map() {
                Some(spec) => spec,
                None => {
                    return Err(Error::type_mismatch(format!(
                        "every target in {} must be a map",
                        build_file
                    )))
                }
            };
            let name = match spec.get("name").and_then(Value::as_str) {
                Some(name) => name,
                None => {
                    return Err(Error::type_mismatch(format!(
                        "a target in {} is missing its name string",
                        build_file
                    )))
                }
            };
            if spec.get("type").and_then(Value::as_str).is_none() {
                return Err(Error::type_mismatch(format!(
                    "target {} in {} is missing its type string",
                    name, build_file
                )));
            }

            let qualified = paths::qualify(build_file, name);
            if targets.insert(qualified.clone(), spec.clone()).is_some() {
                warn!(
                    "target {} is defined more than once; keeping the last definition",
                    qualified
                );
            }
        }
    }
    Ok(targets)
}

/// A build file's `settings` map is inherited by each of that file's
/// targets.
fn merge_file_settings(data: &FileTable, targets: &mut TargetTable) -> Result<()> {
    for (build_file, file_map) in data {
        let settings = match file_map.get("settings") {
            None => continue,
            Some(Value::Map(settings)) => settings,
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "settings in {} must be a map, not a {}",
                    build_file,
                    other.type_name()
                )))
            }
        };
        for (name, spec) in targets.iter_mut() {
            if &paths::build_file_of(name) == build_file {
                merge_dicts(spec, settings, build_file, build_file)?;
            }
        }
    }
    Ok(())
}

/// For each target, merge `kind` maps carried by the relevant dependency
/// closure. Walking flat_list in order makes settings cascade: by the time a
/// target is processed, its dependencies already absorbed what their own
/// dependencies exported.
fn propagate_dependent_settings(
    kind: &str,
    flat_list: &[String],
    targets: &mut TargetTable,
    dependency_graph: &DependencyGraph,
) -> Result<()> {
    for target in flat_list {
        let dependencies = match kind {
            "all_dependent_settings" => dependency_graph.deep_dependencies(target),
            "direct_dependent_settings" => dependency_graph.direct_dependencies(target),
            "link_settings" => dependency_graph.link_dependencies(target, targets),
            other => unreachable!("unknown dependent-settings kind {}", other),
        };

        let build_file = paths::build_file_of(target);
        for dependency in dependencies {
            let settings = match targets.get(&dependency).and_then(|spec| spec.get(kind)) {
                None => continue,
                Some(Value::Map(settings)) => settings.clone(),
                Some(other) => {
                    return Err(Error::type_mismatch(format!(
                        "{} of {} must be a map, not a {}",
                        kind,
                        dependency,
                        other.type_name()
                    )))
                }
            };
            trace!("Merging {} of {} into {}", kind, dependency, target);
            let dependency_build_file = paths::build_file_of(&dependency);
            merge_dicts(
                spec_mut(targets, target),
                &settings,
                &build_file,
                &dependency_build_file,
            )?;
        }
    }
    Ok(())
}

/// Static libraries do not link: every non-static-library target that
/// transitively depends on one must link it (and its libraries) itself.
/// Afterwards the static library sheds its own `dependencies` and
/// `libraries`.
fn absorb_static_libraries(
    flat_list: &[String],
    targets: &mut TargetTable,
    dependency_graph: &DependencyGraph,
) -> Result<()> {
    for target in flat_list {
        let spec = spec_mut(targets, target);
        if spec.get("type").and_then(Value::as_str) != Some("static_library") {
            continue;
        }

        let libraries = match spec.get("libraries") {
            None => None,
            Some(Value::List(libraries)) => Some(libraries.clone()),
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "libraries of {} must be a list, not a {}",
                    target,
                    other.type_name()
                )))
            }
        };

        for dependent in dependency_graph.deep_dependents(target) {
            let dependent_spec = spec_mut(targets, &dependent);
            if dependent_spec.get("type").and_then(Value::as_str) == Some("static_library") {
                continue;
            }

            // Depend on the static library directly, if not already.
            match dependent_spec
                .entry("dependencies".to_owned())
                .or_insert_with(|| Value::List(Vec::new()))
            {
                Value::List(dependencies) => {
                    let qualified = Value::Str(target.clone());
                    if !dependencies.contains(&qualified) {
                        dependencies.push(qualified);
                    }
                }
                other => {
                    return Err(Error::type_mismatch(format!(
                        "dependencies of {} must be a list, not a {}",
                        dependent,
                        other.type_name()
                    )))
                }
            }

            // And link against whatever the static library wanted.
            if let Some(source_libraries) = &libraries {
                match dependent_spec
                    .entry("libraries".to_owned())
                    .or_insert_with(|| Value::List(Vec::new()))
                {
                    Value::List(dependent_libraries) => {
                        for library in source_libraries {
                            if !dependent_libraries.contains(library) {
                                dependent_libraries.push(library.clone());
                            }
                        }
                    }
                    other => {
                        return Err(Error::type_mismatch(format!(
                            "libraries of {} must be a list, not a {}",
                            dependent,
                            other.type_name()
                        )))
                    }
                }
            }
        }

        let spec = spec_mut(targets, target);
        spec.remove("dependencies");
        spec.remove("libraries");
    }
    Ok(())
}

/// Overwrite each file's target entries with their resolved specs so that
/// `data` and `targets` agree when handed to the generator.
fn restore_targets_into_data(data: &mut FileTable, targets: &TargetTable) {
    for (build_file, file_map) in data.iter_mut() {
        let list = match file_map.get_mut("targets") {
            Some(Value::List(list)) => list,
            _ => continue,
        };
        for item in list.iter_mut() {
            let qualified = item
                .as_map()
                .and_then(|spec| spec.get("name"))
                .and_then(Value::as_str)
                .map(|name| paths::qualify(build_file, name));
            if let Some(resolved) = qualified.and_then(|q| targets.get(&q)) {
                *item = Value::Map(resolved.clone());
            }
        }
    }
}
