//! The target dependency graph.
//!
//! Nodes live in an arena indexed by position; the synthetic root is node 0
//! and every target without dependencies hangs off it. `dependencies` and
//! `dependents` are index vectors, so the graph is cycle-safe to own and
//! cheap to traverse in both directions.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::paths;
use crate::value::{BuildMap, Value};

/// Targets whose output is produced by a linker. Everything else (static
/// libraries, loadable modules, `none`) is non-linkable.
pub const LINKABLE_TYPES: [&str; 2] = ["executable", "shared_library"];

pub fn is_linkable(spec: &BuildMap) -> bool {
    match spec.get("type").and_then(Value::as_str) {
        Some(target_type) => LINKABLE_TYPES.contains(&target_type),
        None => false,
    }
}

pub type TargetTable = BTreeMap<String, BuildMap>;

const ROOT: usize = 0;

#[derive(Debug)]
struct Node {
    reference: Option<String>,
    dependencies: Vec<usize>,
    dependents: Vec<usize>,
}

impl Node {
    fn new(reference: Option<String>) -> Self {
        Node {
            reference,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: BTreeMap<String, usize>,
}

/// Build the graph from the target table and flatten it topologically.
///
/// Dependency references are qualified against their target's build file and
/// written back into each spec in place, so every later pass sees canonical
/// `build_file:target` names.
pub fn build_dependency_graph(targets: &mut TargetTable) -> Result<(DependencyGraph, Vec<String>)> {
    let mut graph = DependencyGraph {
        nodes: vec![Node::new(None)],
        index: BTreeMap::new(),
    };
    for name in targets.keys() {
        graph.index.insert(name.clone(), graph.nodes.len());
        graph.nodes.push(Node::new(Some(name.clone())));
    }

    for (name, spec) in targets.iter_mut() {
        let node = graph.index[name];
        let dependencies = match spec.get_mut("dependencies") {
            Some(Value::List(dependencies)) => dependencies,
            Some(other) => {
                return Err(Error::type_mismatch(format!(
                    "dependencies of {} must be a list, not a {}",
                    name,
                    other.type_name()
                )))
            }
            None => {
                link(&mut graph.nodes, node, ROOT);
                continue;
            }
        };
        if dependencies.is_empty() {
            link(&mut graph.nodes, node, ROOT);
            continue;
        }

        let build_file = paths::build_file_of(name);
        for item in dependencies.iter_mut() {
            let reference = match item {
                Value::Str(reference) => reference,
                other => {
                    return Err(Error::type_mismatch(format!(
                        "dependency of {} must be a string, not a {}",
                        name,
                        other.type_name()
                    )))
                }
            };
            // Store the qualified form; everything downstream keys on it.
            let qualified = paths::qualify(&build_file, reference);
            *item = Value::Str(qualified.clone());

            let dependency = match graph.index.get(&qualified) {
                Some(&dependency) => dependency,
                None => {
                    return Err(Error::MissingDependency {
                        target: name.clone(),
                        dependency: qualified,
                    })
                }
            };
            link(&mut graph.nodes, node, dependency);
        }
    }

    let flat_list = graph.flatten();
    if flat_list.len() != targets.len() {
        let remaining = targets
            .keys()
            .filter(|name| !flat_list.contains(*name))
            .cloned()
            .collect();
        return Err(Error::CircularDependency { remaining });
    }

    Ok((graph, flat_list))
}

fn link(nodes: &mut [Node], dependent: usize, dependency: usize) {
    nodes[dependent].dependencies.push(dependency);
    nodes[dependency].dependents.push(dependent);
}

impl DependencyGraph {
    /// Kahn-style flattening: every target appears after all of its
    /// dependencies. Ties break by insertion order into the ready queue,
    /// which makes the result deterministic for a given input.
    pub fn flatten(&self) -> Vec<String> {
        let mut flat_list = Vec::new();
        let mut emitted = vec![false; self.nodes.len()];
        let mut queued = vec![false; self.nodes.len()];
        emitted[ROOT] = true;

        let mut ready: Vec<usize> = self.nodes[ROOT].dependents.clone();
        for &node in &ready {
            queued[node] = true;
        }

        let mut next = 0;
        while next < ready.len() {
            let node = ready[next];
            next += 1;
            emitted[node] = true;
            if let Some(reference) = &self.nodes[node].reference {
                flat_list.push(reference.clone());
            }

            for &dependent in &self.nodes[node].dependents {
                if queued[dependent] {
                    continue;
                }
                let is_ready = self.nodes[dependent]
                    .dependencies
                    .iter()
                    .all(|&dependency| emitted[dependency]);
                if is_ready {
                    ready.push(dependent);
                    queued[dependent] = true;
                }
            }
        }

        flat_list
    }

    fn node(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn direct_dependencies(&self, name: &str) -> Vec<String> {
        let mut dependencies = Vec::new();
        if let Some(node) = self.node(name) {
            for &dependency in &self.nodes[node].dependencies {
                if let Some(reference) = &self.nodes[dependency].reference {
                    push_unique(&mut dependencies, reference);
                }
            }
        }
        dependencies
    }

    pub fn deep_dependencies(&self, name: &str) -> Vec<String> {
        let mut dependencies = Vec::new();
        if let Some(node) = self.node(name) {
            self.collect_deep(node, Direction::Dependencies, &mut dependencies);
        }
        dependencies
    }

    pub fn direct_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents = Vec::new();
        if let Some(node) = self.node(name) {
            for &dependent in &self.nodes[node].dependents {
                if let Some(reference) = &self.nodes[dependent].reference {
                    push_unique(&mut dependents, reference);
                }
            }
        }
        dependents
    }

    pub fn deep_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents = Vec::new();
        if let Some(node) = self.node(name) {
            self.collect_deep(node, Direction::Dependents, &mut dependents);
        }
        dependents
    }

    fn collect_deep(&self, node: usize, direction: Direction, out: &mut Vec<String>) {
        let neighbors = match direction {
            Direction::Dependencies => &self.nodes[node].dependencies,
            Direction::Dependents => &self.nodes[node].dependents,
        };
        for &neighbor in neighbors {
            if let Some(reference) = &self.nodes[neighbor].reference {
                if push_unique(out, reference) {
                    self.collect_deep(neighbor, direction, out);
                }
            }
        }
    }

    /// The set of targets whose object code is linked into `name`.
    ///
    /// A non-linkable starting target links nothing. Once inside the
    /// recursion the polarity flips: non-linkable dependencies (static
    /// libraries and friends) are absorbed and searched further, while a
    /// linkable dependency terminates its branch, since it links its own
    /// closure separately.
    pub fn link_dependencies(&self, name: &str, targets: &TargetTable) -> Vec<String> {
        let mut dependencies = Vec::new();
        if let Some(node) = self.node(name) {
            self.collect_link_dependencies(node, targets, &mut dependencies, true);
        }
        dependencies
    }

    fn collect_link_dependencies(
        &self,
        node: usize,
        targets: &TargetTable,
        out: &mut Vec<String>,
        initial: bool,
    ) {
        let reference = match &self.nodes[node].reference {
            Some(reference) => reference,
            None => return,
        };
        let linkable = targets.get(reference).map(is_linkable).unwrap_or(false);
        if initial != linkable {
            return;
        }

        if push_unique(out, reference) {
            for &dependency in &self.nodes[node].dependencies {
                self.collect_link_dependencies(dependency, targets, out, false);
            }
        }
    }

    /// The nearest enclosing linkable targets along each chain of
    /// dependents: the final binaries this target's code ends up inside.
    /// A linkable target is its own answer.
    pub fn link_dependents(&self, name: &str, targets: &TargetTable) -> Vec<String> {
        let mut dependents = Vec::new();
        if let Some(node) = self.node(name) {
            self.collect_link_dependents(node, targets, &mut dependents);
        }
        dependents
    }

    fn collect_link_dependents(&self, node: usize, targets: &TargetTable, out: &mut Vec<String>) {
        let reference = match &self.nodes[node].reference {
            Some(reference) => reference,
            None => return,
        };
        if targets.get(reference).map(is_linkable).unwrap_or(false) {
            push_unique(out, reference);
        } else {
            for &dependent in &self.nodes[node].dependents {
                self.collect_link_dependents(dependent, targets, out);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Dependencies,
    Dependents,
}

/// Append if absent; true when the item was newly added.
fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|existing| existing == item) {
        false
    } else {
        list.push(item.to_owned());
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use maplit::btreemap;

    fn target(name: &str, target_type: &str, dependencies: &[&str]) -> (String, BuildMap) {
        let mut spec = btreemap! {
            "name".to_string() => Value::from(name.rsplit(':').next().unwrap()),
            "type".to_string() => Value::from(target_type),
        };
        if !dependencies.is_empty() {
            spec.insert(
                "dependencies".to_string(),
                Value::List(dependencies.iter().map(|d| Value::from(*d)).collect()),
            );
        }
        (name.to_owned(), spec)
    }

    fn table(entries: Vec<(String, BuildMap)>) -> TargetTable {
        entries.into_iter().collect()
    }

    #[test]
    fn simple_chain_flattens_dependencies_first() {
        let mut targets = table(vec![
            target("a.bp:exe", "executable", &["lib"]),
            target("a.bp:lib", "static_library", &[]),
        ]);
        let (_, flat_list) = build_dependency_graph(&mut targets).unwrap();
        assert_eq!(flat_list, vec!["a.bp:lib", "a.bp:exe"]);
        // The reference was requalified in place.
        assert_eq!(
            targets["a.bp:exe"]["dependencies"],
            Value::List(vec![Value::from("a.bp:lib")])
        );
    }

    #[test]
    fn cycles_are_fatal_and_name_the_participants() {
        let mut targets = table(vec![
            target("a.bp:x", "none", &["y"]),
            target("a.bp:y", "none", &["x"]),
        ]);
        match build_dependency_graph(&mut targets).unwrap_err() {
            Error::CircularDependency { remaining } => {
                assert_eq!(remaining, vec!["a.bp:x", "a.bp:y"]);
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn missing_dependencies_are_fatal() {
        let mut targets = table(vec![target("a.bp:exe", "executable", &["ghost"])]);
        match build_dependency_graph(&mut targets).unwrap_err() {
            Error::MissingDependency { target, dependency } => {
                assert_eq!(target, "a.bp:exe");
                assert_eq!(dependency, "a.bp:ghost");
            }
            other => panic!("expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn cross_file_references_resolve_against_the_referencing_file() {
        let mut targets = table(vec![
            target("sub/a.bp:exe", "executable", &["../lib.bp:util"]),
            target("lib.bp:util", "static_library", &[]),
        ]);
        let (_, flat_list) = build_dependency_graph(&mut targets).unwrap();
        assert_eq!(flat_list, vec!["lib.bp:util", "sub/a.bp:exe"]);
    }

    #[test]
    fn closures_over_a_diamond() {
        let mut targets = table(vec![
            target("a.bp:app", "executable", &["left", "right"]),
            target("a.bp:left", "static_library", &["base"]),
            target("a.bp:right", "static_library", &["base"]),
            target("a.bp:base", "static_library", &[]),
        ]);
        let (graph, flat_list) = build_dependency_graph(&mut targets).unwrap();

        assert_eq!(flat_list.last().unwrap(), "a.bp:app");
        assert_eq!(
            graph.direct_dependencies("a.bp:app"),
            vec!["a.bp:left", "a.bp:right"]
        );
        assert_eq!(
            graph.deep_dependencies("a.bp:app"),
            vec!["a.bp:left", "a.bp:base", "a.bp:right"]
        );
        assert_eq!(graph.deep_dependents("a.bp:base").len(), 3);
        assert_eq!(graph.direct_dependents("a.bp:base").len(), 2);
    }

    #[test]
    fn link_closure_stops_at_linkable_boundaries() {
        let mut targets = table(vec![
            target("a.bp:exe", "executable", &["mid", "dso"]),
            target("a.bp:mid", "static_library", &["low"]),
            target("a.bp:low", "static_library", &[]),
            target("a.bp:dso", "shared_library", &["inner"]),
            target("a.bp:inner", "static_library", &[]),
        ]);
        let (graph, _) = build_dependency_graph(&mut targets).unwrap();

        // The executable absorbs its static chain but not the shared
        // library or anything behind it.
        assert_eq!(
            graph.link_dependencies("a.bp:exe", &targets),
            vec!["a.bp:exe", "a.bp:mid", "a.bp:low"]
        );
        // The shared library gathers its own closure.
        assert_eq!(
            graph.link_dependencies("a.bp:dso", &targets),
            vec!["a.bp:dso", "a.bp:inner"]
        );
        // A non-linkable target links nothing itself.
        assert_eq!(graph.link_dependencies("a.bp:mid", &targets), Vec::<String>::new());

        // Nearest linkable dependents.
        assert_eq!(graph.link_dependents("a.bp:low", &targets), vec!["a.bp:exe"]);
        assert_eq!(graph.link_dependents("a.bp:inner", &targets), vec!["a.bp:dso"]);
        assert_eq!(graph.link_dependents("a.bp:exe", &targets), vec!["a.bp:exe"]);
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        // Random DAGs: orient every generated pair from the larger index to
        // the smaller one, so cycles cannot occur by construction.
        fn arbitrary_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
            (2usize..10)
                .prop_flat_map(|count| {
                    (
                        Just(count),
                        prop::collection::vec((0..count, 0..count), 0..20),
                    )
                })
                .prop_map(|(count, pairs)| {
                    let mut edges = vec![Vec::new(); count];
                    for (a, b) in pairs {
                        if a != b {
                            edges[a.max(b)].push(a.min(b));
                        }
                    }
                    edges
                })
        }

        fn dag_targets(edges: &[Vec<usize>]) -> TargetTable {
            edges
                .iter()
                .enumerate()
                .map(|(i, deps)| {
                    let names: Vec<String> = deps.iter().map(|d| format!("t{}", d)).collect();
                    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                    target(&format!("a.bp:t{}", i), "none", &refs)
                })
                .collect()
        }

        proptest! {
            // Every dependency appears before its dependent.
            #[test]
            fn flatten_respects_dependencies(edges in arbitrary_dag()) {
                let mut targets = dag_targets(&edges);
                let (_, flat_list) = build_dependency_graph(&mut targets).unwrap();
                prop_assert_eq!(flat_list.len(), edges.len());

                let position = |name: &str| {
                    flat_list.iter().position(|n| n == name).unwrap()
                };
                for (i, deps) in edges.iter().enumerate() {
                    for d in deps {
                        let dependent = format!("a.bp:t{}", i);
                        let dependency = format!("a.bp:t{}", d);
                        prop_assert!(position(&dependency) < position(&dependent));
                    }
                }
            }

            // Flattening is a pure function of the graph.
            #[test]
            fn flatten_is_idempotent(edges in arbitrary_dag()) {
                let mut targets = dag_targets(&edges);
                let (graph, flat_list) = build_dependency_graph(&mut targets).unwrap();
                prop_assert_eq!(graph.flatten(), flat_list);
            }
        }
    }
}
