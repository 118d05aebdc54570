//! Assignment of modules to output artifacts

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{config::SplitPolicy, module_graph::DependencyGraph, types::ResolvedPath};

/// Index of the entry artifact in a [`ChunkPlan`]
pub const ENTRY_ARTIFACT: usize = 0;

/// Which artifact every module is emitted into
#[derive(Debug, Clone, Default)]
pub struct ChunkPlan<'g> {
    owners: FxHashMap<&'g ResolvedPath, usize>,
    /// Chunk roots in emission order; chunk `i` is artifact `i + 1`
    roots: Vec<&'g ResolvedPath>,
}

impl<'g> ChunkPlan<'g> {
    /// Split `order` according to `policy`
    pub fn new(graph: &'g DependencyGraph, order: &[&'g ResolvedPath], policy: SplitPolicy) -> Self {
        match policy {
            SplitPolicy::Single => Self {
                owners: order.iter().map(|path| (*path, ENTRY_ARTIFACT)).collect(),
                roots: Vec::new(),
            },
            SplitPolicy::Dynamic => split_dynamic(graph, order),
        }
    }

    /// Artifact index of a module
    pub fn owner(&self, path: &ResolvedPath) -> usize {
        self.owners.get(path).copied().unwrap_or(ENTRY_ARTIFACT)
    }

    /// Number of side chunks
    pub fn chunk_count(&self) -> usize {
        self.roots.len()
    }

    /// Virtual file name of side chunk `index` (0-based)
    pub fn chunk_name(index: usize) -> String {
        format!("chunks/{index}.js")
    }

    /// File name of the artifact a module lives in, `None` for the entry
    pub fn chunk_file_of(&self, path: &ResolvedPath) -> Option<String> {
        match self.owner(path) {
            ENTRY_ARTIFACT => None,
            artifact => Some(Self::chunk_name(artifact - 1)),
        }
    }
}

/// Modules reachable from `start` over static edges, excluding `exclude`
fn static_closure<'g>(
    graph: &'g DependencyGraph,
    start: &'g ResolvedPath,
    exclude: &FxHashSet<&'g ResolvedPath>,
) -> FxHashSet<&'g ResolvedPath> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![start];
    while let Some(path) = stack.pop() {
        if exclude.contains(path) || !seen.insert(path) {
            continue;
        }
        if let Some(node) = graph.node(path) {
            stack.extend(node.static_targets());
        }
    }
    seen
}

fn split_dynamic<'g>(graph: &'g DependencyGraph, order: &[&'g ResolvedPath]) -> ChunkPlan<'g> {
    let mut entry_set = static_closure(graph, graph.entry(), &FxHashSet::default());

    // Dynamic targets in emission order
    let mut candidates: Vec<&ResolvedPath> = Vec::new();
    for path in order {
        if let Some(node) = graph.node(path) {
            for target in node.dynamic_targets() {
                if !candidates.contains(&target) {
                    candidates.push(target);
                }
            }
        }
    }

    // Hoist modules shared between chunk roots until every module has one owner
    let closures = loop {
        let roots: Vec<_> = candidates
            .iter()
            .copied()
            .filter(|root| !entry_set.contains(root))
            .collect();
        let closures: Vec<_> = roots
            .iter()
            .map(|root| (*root, static_closure(graph, *root, &entry_set)))
            .collect();

        let mut counts: FxHashMap<&ResolvedPath, usize> = FxHashMap::default();
        for (_, closure) in &closures {
            for path in closure {
                *counts.entry(*path).or_default() += 1;
            }
        }
        let shared: Vec<&ResolvedPath> = order
            .iter()
            .copied()
            .filter(|path| counts.get(path).is_some_and(|count| *count > 1))
            .collect();
        if shared.is_empty() {
            break closures;
        }

        debug!("Hoisting {} shared module(s) into the entry artifact", shared.len());
        for path in shared {
            let hoisted = static_closure(graph, path, &entry_set);
            entry_set.extend(hoisted);
        }
    };

    let mut owners: FxHashMap<&ResolvedPath, usize> =
        entry_set.iter().map(|path| (*path, ENTRY_ARTIFACT)).collect();
    let mut roots = Vec::with_capacity(closures.len());
    for (idx, (root, closure)) in closures.into_iter().enumerate() {
        debug!("Chunk {idx} rooted at {root} holds {} module(s)", closure.len());
        owners.extend(closure.into_iter().map(|path| (path, idx + 1)));
        roots.push(root);
    }
    ChunkPlan { owners, roots }
}
