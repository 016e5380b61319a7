//! Build-file loading: read, parse, early-phase processing, include
//! inlining, and the memoized transitive load over dependency references.

use std::collections::BTreeMap;
use std::io;

use crate::error::{Error, Result};
use crate::expand::{self, Phase};
use crate::merge::merge_dicts;
use crate::parser;
use crate::paths;
use crate::value::{BuildMap, Value, Variables};

/// Every loaded build file, keyed by normalized path. Load order follows
/// depth-first discovery from the files named on the command line.
pub type FileTable = BTreeMap<String, BuildMap>;

/// The loader's only window onto the filesystem, so tests can feed it
/// in-memory files.
#[cfg_attr(test, mockall::automock)]
pub trait FileReader {
    fn read_to_string(&mut self, path: &str) -> io::Result<String>;
}

pub struct DiskReader;

impl FileReader for DiskReader {
    fn read_to_string(&mut self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Load a single build file: read it, parse it, run the early phase, and
/// inline its includes.
pub fn load_one_build_file(
    reader: &mut dyn FileReader,
    path: &str,
    variables: &Variables,
) -> Result<BuildMap> {
    debug!("Loading build file {:?}", path);
    let contents = reader.read_to_string(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;

    let mut build_file = parser::parse_build_file(path, &contents)?;
    expand::process_map(&mut build_file, Phase::Early, variables.clone())?;
    inline_includes_in_map(&mut build_file, path, reader, variables)?;

    trace!("Loaded {:?}: {:#?}", path, build_file);
    Ok(build_file)
}

/// Consume an `includes` key by loading each referenced file and merging it
/// into the host map, then sweep child maps and lists for nested `includes`.
/// Included files run through the full loader themselves, so their own
/// includes are already resolved by the time they merge in.
fn inline_includes_in_map(
    map: &mut BuildMap,
    path: &str,
    reader: &mut dyn FileReader,
    variables: &Variables,
) -> Result<()> {
    if let Some(includes) = map.remove("includes") {
        let includes = match includes {
            Value::List(includes) => includes,
            other => {
                return Err(Error::type_mismatch(format!(
                    "includes in {} must be a list, not a {}",
                    path,
                    other.type_name()
                )))
            }
        };
        for include in &includes {
            let include = match include.as_str() {
                Some(include) => include,
                None => {
                    return Err(Error::type_mismatch(format!(
                        "includes in {} must name files as strings, not {}s",
                        path,
                        include.type_name()
                    )))
                }
            };
            let resolved = paths::normalize(&paths::join(paths::dirname(path), include));
            debug!("Inlining {:?} into {:?}", resolved, path);
            let included = load_one_build_file(reader, &resolved, variables)?;
            merge_dicts(map, &included, path, &resolved)?;
        }
    }

    for value in map.values_mut() {
        match value {
            Value::Map(child) => inline_includes_in_map(child, path, reader, variables)?,
            Value::List(child) => inline_includes_in_list(child, path, reader, variables)?,
            _ => {}
        }
    }
    Ok(())
}

fn inline_includes_in_list(
    list: &mut [Value],
    path: &str,
    reader: &mut dyn FileReader,
    variables: &Variables,
) -> Result<()> {
    for item in list.iter_mut() {
        match item {
            Value::Map(child) => inline_includes_in_map(child, path, reader, variables)?,
            Value::List(child) => inline_includes_in_list(child, path, reader, variables)?,
            _ => {}
        }
    }
    Ok(())
}

/// Load `path` and, transitively, every build file its targets' dependency
/// references point into. Memoized on normalized path, which also breaks
/// file-level reference cycles; target-level cycles surface later in the
/// graph build.
pub fn load_target_build_file(
    reader: &mut dyn FileReader,
    path: &str,
    data: &mut FileTable,
    variables: &Variables,
) -> Result<()> {
    let path = paths::normalize(path);
    if data.contains_key(&path) {
        return Ok(());
    }

    let build_file = load_one_build_file(reader, &path, variables)?;
    reject_file_scope_target_conditions(&build_file, &path)?;
    data.insert(path.clone(), build_file);

    let mut referenced: Vec<String> = Vec::new();
    if let Some(Value::List(targets)) = data[&path].get("targets") {
        for target in targets {
            let dependencies = target
                .as_map()
                .and_then(|spec| spec.get("dependencies"))
                .and_then(Value::as_list);
            for dependency in dependencies.into_iter().flatten() {
                if let Some(reference) = dependency.as_str() {
                    let (other_file, _) = paths::split_reference(&path, reference);
                    referenced.push(other_file);
                }
            }
        }
    }

    for other_file in referenced {
        load_target_build_file(reader, &other_file, data, variables)?;
    }
    Ok(())
}

/// Only a target can carry `target_conditions`. Everything outside the
/// `targets` list is file scope — `settings` and `variables` included, and
/// `settings` in particular is later merged wholesale into every target, so
/// a `target_conditions` smuggled through it would be evaluated as if
/// authored in the target. Reject it at load time instead.
fn reject_file_scope_target_conditions(build_file: &BuildMap, path: &str) -> Result<()> {
    for (key, value) in build_file {
        if key == "targets" {
            continue;
        }
        if key == "target_conditions" {
            return Err(file_scope_target_conditions_error(path));
        }
        scan_for_target_conditions(value, path)?;
    }
    Ok(())
}

fn scan_for_target_conditions(value: &Value, path: &str) -> Result<()> {
    match value {
        Value::Map(map) => {
            for (key, child) in map {
                if key == "target_conditions" {
                    return Err(file_scope_target_conditions_error(path));
                }
                scan_for_target_conditions(child, path)?;
            }
            Ok(())
        }
        Value::List(items) => {
            for item in items {
                scan_for_target_conditions(item, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn file_scope_target_conditions_error(path: &str) -> Error {
    Error::type_mismatch(format!(
        "target_conditions in {} is only valid inside a target",
        path
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    use maplit::btreemap;
    use mockall::predicate::eq;

    fn reader_with(files: Vec<(&'static str, &'static str)>) -> MockFileReader {
        let table: BTreeMap<String, String> = files
            .into_iter()
            .map(|(path, contents)| (path.to_owned(), contents.to_owned()))
            .collect();
        let mut reader = MockFileReader::new();
        reader.expect_read_to_string().returning(move |path| {
            table.get(path).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path))
            })
        });
        reader
    }

    #[test]
    fn loads_dependencies_transitively_and_memoizes() {
        let mut reader = MockFileReader::new();
        reader
            .expect_read_to_string()
            .with(eq("a.bp"))
            .times(1)
            .returning(|_| {
                Ok(r#"{
                    'targets': [
                        {'name': 'one', 'type': 'none', 'dependencies': ['b.bp:x', 'two']},
                        {'name': 'two', 'type': 'none', 'dependencies': ['b.bp:y']},
                    ],
                }"#
                .to_owned())
            });
        reader
            .expect_read_to_string()
            .with(eq("b.bp"))
            .times(1)
            .returning(|_| Ok("{'targets': [{'name': 'x', 'type': 'none'}]}".to_owned()));

        let mut data = FileTable::new();
        load_target_build_file(&mut reader, "./a.bp", &mut data, &Variables::new()).unwrap();

        assert!(data.contains_key("a.bp"));
        assert!(data.contains_key("b.bp"));
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn includes_merge_with_path_rewriting() {
        let mut reader = reader_with(vec![
            (
                "sub/app.bp",
                "{'includes': ['../common.bpi'], 'sources': ['main.cc']}",
            ),
            ("common.bpi", "{'sources': ['shared.cc'], 'defines': ['COMMON']}"),
        ]);

        let loaded =
            load_one_build_file(&mut reader, "sub/app.bp", &Variables::new()).unwrap();

        assert!(!loaded.contains_key("includes"));
        // shared.cc was relative to the repository root; from sub/ it is a
        // level up. Non-path lists are untouched.
        assert_eq!(
            loaded["sources"],
            Value::List(vec!["main.cc".into(), "../shared.cc".into()])
        );
        assert_eq!(loaded["defines"], Value::List(vec!["COMMON".into()]));
    }

    #[test]
    fn nested_includes_inside_child_maps_are_inlined() {
        let mut reader = reader_with(vec![
            (
                "a.bp",
                "{'targets': [{'name': 't', 'type': 'none', 'includes': ['extra.bpi']}]}",
            ),
            ("extra.bpi", "{'defines': ['EXTRA']}"),
        ]);

        let loaded = load_one_build_file(&mut reader, "a.bp", &Variables::new()).unwrap();
        let target = loaded["targets"].as_list().unwrap()[0].as_map().unwrap();
        assert_eq!(target["defines"], Value::List(vec!["EXTRA".into()]));
        assert!(!target.contains_key("includes"));
    }

    #[test]
    fn includes_see_the_same_variables() {
        let mut reader = reader_with(vec![
            ("a.bp", "{'includes': ['vars.bpi']}"),
            ("vars.bpi", "{'flavor': '<(flavor)'}"),
        ]);

        let variables = btreemap! { "flavor".to_string() => Value::from("debug") };
        let loaded = load_one_build_file(&mut reader, "a.bp", &variables).unwrap();
        assert_eq!(loaded["flavor"], Value::from("debug"));
    }

    #[test]
    fn unreadable_files_are_io_errors() {
        let mut reader = reader_with(vec![]);
        let err =
            load_one_build_file(&mut reader, "missing.bp", &Variables::new()).unwrap_err();
        match err {
            Error::Io { path, .. } => assert_eq!(path, "missing.bp"),
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[test]
    fn parse_errors_name_the_included_file() {
        let mut reader = reader_with(vec![
            ("a.bp", "{'includes': ['broken.bpi']}"),
            ("broken.bpi", "{'key' 'missing colon'}"),
        ]);

        let err = load_one_build_file(&mut reader, "a.bp", &Variables::new()).unwrap_err();
        match err {
            Error::Parse { file, line, .. } => {
                assert_eq!(file, "broken.bpi");
                assert_eq!(line, 1);
            }
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn file_scope_target_conditions_are_rejected() {
        let file_scope_uses = vec![
            // At the top level of the file.
            "{'target_conditions': [['1==1', {}]], 'targets': []}",
            // Inside the file's settings map, which would otherwise be
            // merged into every target.
            "{'settings': {'target_conditions': [['1==1', {}]]}, 'targets': []}",
            // Inside the file's variables map.
            "{'variables': {'build': {'target_conditions': [['1==1', {}]]}}}",
        ];

        for contents in file_scope_uses {
            let mut reader = reader_with(vec![("a.bp", contents)]);
            let mut data = FileTable::new();
            let err = load_target_build_file(&mut reader, "a.bp", &mut data, &Variables::new())
                .unwrap_err();
            assert!(
                matches!(err, Error::TypeMismatch { .. }),
                "expected {:?} to be rejected",
                contents
            );
        }
    }

    #[test]
    fn target_conditions_inside_a_target_survive_loading() {
        let mut reader = reader_with(vec![(
            "a.bp",
            "{'targets': [{'name': 't', 'type': 'none', 'target_conditions': [['1==1', {}]]}]}",
        )]);

        let mut data = FileTable::new();
        load_target_build_file(&mut reader, "a.bp", &mut data, &Variables::new()).unwrap();
        let target = data["a.bp"]["targets"].as_list().unwrap()[0].as_map().unwrap();
        assert!(target.contains_key("target_conditions"));
    }
}
