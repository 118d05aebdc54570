//! Deterministic emission order

use std::collections::VecDeque;

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{module_graph::DependencyGraph, types::ResolvedPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Emitted,
}

/// Order modules so that static dependencies come before their importers
///
/// Depth-first from the entry over static edges in source order. A back edge
/// into a module that is still being visited is treated as satisfied; that
/// module is emitted when its own traversal completes. Targets of `import()`
/// are queued in the order they are seen and traversed after the entry's
/// static closure, each as a new root.
pub fn emission_order(graph: &DependencyGraph) -> Vec<&ResolvedPath> {
    let mut states: FxHashMap<&ResolvedPath, VisitState> = FxHashMap::default();
    let mut order = Vec::with_capacity(graph.len());
    let mut roots = VecDeque::from([graph.entry()]);
    let mut queued: FxHashSet<&ResolvedPath> = FxHashSet::default();

    while let Some(root) = roots.pop_front() {
        if states.contains_key(root) {
            continue;
        }
        states.insert(root, VisitState::Visiting);
        let mut stack = vec![(root, 0usize)];

        while let Some(frame) = stack.last_mut() {
            let path = frame.0;
            let edges = graph.node(path).map_or(&[][..], |node| &node.edges[..]);
            let pending = edges[frame.1..]
                .iter()
                .position(|edge| edge.kind.is_static());

            let Some(offset) = pending else {
                stack.pop();
                states.insert(path, VisitState::Emitted);
                order.push(path);
                for edge in edges.iter().filter(|edge| !edge.kind.is_static()) {
                    if queued.insert(&edge.target) {
                        roots.push_back(&edge.target);
                    }
                }
                continue;
            };

            let target = &edges[frame.1 + offset].target;
            frame.1 += offset + 1;
            match states.get(target) {
                None => {
                    states.insert(target, VisitState::Visiting);
                    stack.push((target, 0));
                }
                Some(VisitState::Visiting) => {
                    trace!("Back edge {path} -> {target} treated as satisfied");
                }
                Some(VisitState::Emitted) => {}
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        module_graph::{ModuleEdge, ModuleNode},
        types::ModuleSpecifier,
        visitors::ImportKind,
    };

    fn path(name: &str) -> ResolvedPath {
        ResolvedPath::new(Path::new("/project").join(name))
    }

    fn graph(modules: &[(&str, &[(&str, ImportKind)])]) -> DependencyGraph {
        let nodes: IndexMap<_, _> = modules
            .iter()
            .map(|(name, targets)| {
                let mut node = ModuleNode::new(path(name), String::new(), None);
                node.edges = targets
                    .iter()
                    .map(|(target, kind)| ModuleEdge {
                        specifier: ModuleSpecifier::new(format!("./{target}")),
                        target: path(target),
                        kind: *kind,
                    })
                    .collect();
                (node.path.clone(), node)
            })
            .collect();
        DependencyGraph::new(path(modules[0].0), nodes, Vec::new())
    }

    fn names<'a>(order: &[&'a ResolvedPath]) -> Vec<&'a str> {
        order
            .iter()
            .filter_map(|path| path.path().file_name()?.to_str())
            .collect()
    }

    const S: ImportKind = ImportKind::Static;
    const D: ImportKind = ImportKind::Dynamic;

    #[test]
    fn test_dependency_before_importer() {
        let graph = graph(&[("a.js", &[("b.js", S)]), ("b.js", &[])]);
        assert_eq!(names(&emission_order(&graph)), vec!["b.js", "a.js"]);
    }

    #[test]
    fn test_diamond_is_emitted_once_in_source_order() {
        let graph = graph(&[
            ("a.js", &[("b.js", S), ("c.js", ImportKind::Require)]),
            ("b.js", &[("d.js", S)]),
            ("c.js", &[("d.js", ImportKind::ReExport)]),
            ("d.js", &[]),
        ]);
        assert_eq!(
            names(&emission_order(&graph)),
            vec!["d.js", "b.js", "c.js", "a.js"]
        );
    }

    #[test]
    fn test_cycle_members_appear_once() {
        let graph = graph(&[
            ("a.js", &[("b.js", S)]),
            ("b.js", &[("a.js", S), ("c.js", S)]),
            ("c.js", &[]),
        ]);
        assert_eq!(names(&emission_order(&graph)), vec!["c.js", "b.js", "a.js"]);
    }

    #[test]
    fn test_dynamic_targets_follow_static_closure() {
        let graph = graph(&[
            ("a.js", &[("lazy.js", D), ("b.js", S)]),
            ("lazy.js", &[("b.js", S), ("c.js", S)]),
            ("b.js", &[]),
            ("c.js", &[]),
        ]);
        assert_eq!(
            names(&emission_order(&graph)),
            vec!["b.js", "a.js", "c.js", "lazy.js"]
        );
    }
}
