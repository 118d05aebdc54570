//! Concurrent dependency graph construction
//!
//! Loading starts at the entry and fans out over a bounded rayon pool. The
//! slot map is the only shared state: a target is claimed through the map's
//! entry API before its load is scheduled, so every module is read and
//! scanned exactly once no matter how many importers reach it at the same
//! time. Reading and scanning happen outside of any lock.

use std::{collections::VecDeque, path::Path, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use indexmap::IndexMap;
use log::{debug, info, trace, warn};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::{
    error::{BundleError, Result, SourcePosition},
    fs::FileSystem,
    module_graph::{DependencyGraph, Diagnostic, ModuleEdge, ModuleNode},
    resolver::ModuleResolver,
    types::{ModuleKind, ResolvedPath},
    visitors::scan_module,
};

/// State of a module in the visited map
#[derive(Debug)]
enum Slot {
    /// A load is scheduled or running
    Claimed,
    Loaded(Box<ModuleNode>),
}

/// Builds the [`DependencyGraph`] of one bundle operation
#[derive(Debug)]
pub struct GraphBuilder<'r> {
    resolver: &'r ModuleResolver,
    fs: Arc<dyn FileSystem>,
    slots: DashMap<ResolvedPath, Slot>,
    /// First fatal error; once set no new load starts
    failure: OnceCell<BundleError>,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(resolver: &'r ModuleResolver, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            resolver,
            fs,
            slots: DashMap::new(),
            failure: OnceCell::new(),
        }
    }

    /// Load every module reachable from `entry`
    pub fn build(self, entry: &ResolvedPath) -> Result<DependencyGraph> {
        let jobs = self.resolver.config().effective_jobs();
        debug!("Building dependency graph from {entry} with {jobs} worker(s)");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|idx| format!("stitch-loader-{idx}"))
            .build()?;

        self.slots.insert(entry.clone(), Slot::Claimed);
        pool.scope(|scope| self.load(scope, entry.clone()));

        if let Some(err) = self.failure.into_inner() {
            debug!("Graph construction aborted: {err}");
            return Err(err);
        }

        let loaded: FxHashMap<ResolvedPath, ModuleNode> = self
            .slots
            .into_iter()
            .filter_map(|(path, slot)| match slot {
                Slot::Loaded(node) => Some((path, *node)),
                Slot::Claimed => None,
            })
            .collect();
        let nodes = discovery_order(entry, loaded);

        let diagnostics = nodes
            .values()
            .flat_map(|node| {
                let positions = node
                    .record
                    .as_ref()
                    .map_or(&[][..], |record| &record.unresolvable[..]);
                positions
                    .iter()
                    .map(move |position| unresolvable(node.path.path(), *position))
            })
            .collect();
        let graph = DependencyGraph::new(entry.clone(), nodes, diagnostics);

        let verbose_cycles = self.resolver.config().diagnostics;
        for diagnostic in graph.diagnostics() {
            if diagnostic.is_warning() {
                warn!("{diagnostic}");
            } else if verbose_cycles {
                info!("{diagnostic}");
            } else {
                debug!("{diagnostic}");
            }
        }
        debug!("Dependency graph has {} module(s)", graph.len());
        Ok(graph)
    }

    fn load<'s>(&'s self, scope: &rayon::Scope<'s>, path: ResolvedPath) {
        if self.failure.get().is_some() {
            trace!("Skipping {path}: build already failed");
            return;
        }

        match self.load_module(&path) {
            Ok((node, discovered)) => {
                self.slots.insert(path, Slot::Loaded(Box::new(node)));
                for target in discovered {
                    scope.spawn(move |scope| self.load(scope, target));
                }
            }
            Err(err) => {
                // Only the first failure is kept
                let _ = self.failure.set(err);
            }
        }
    }

    /// Read, scan and resolve one module
    ///
    /// Returns the node and the targets this call claimed.
    fn load_module(&self, path: &ResolvedPath) -> Result<(ModuleNode, Vec<ResolvedPath>)> {
        let mut node = if path.kind().is_asset() {
            let bytes = self
                .fs
                .read(path.path())
                .map_err(|err| BundleError::io(path.path(), err))?;
            ModuleNode::asset(path.clone(), bytes)
        } else {
            let content = self
                .fs
                .read_to_string(path.path())
                .map_err(|err| BundleError::io(path.path(), err))?;
            let record = match path.kind() {
                ModuleKind::Script => Some(scan_module(path.path(), &content)?),
                _ => {
                    validate_json(path.path(), &content)?;
                    None
                }
            };
            ModuleNode::new(path.clone(), content, record)
        };
        let mut discovered = Vec::new();
        if let Some(record) = &node.record {
            let config = self.resolver.config();
            for import in &record.imports {
                if config.is_external(import.specifier.as_str()) {
                    trace!("{path}: '{}' is external", import.specifier);
                    continue;
                }
                let duplicate = node
                    .edges
                    .iter()
                    .any(|edge| edge.specifier == import.specifier && edge.kind == import.kind);
                if duplicate {
                    continue;
                }

                let target = self.resolver.resolve(&import.specifier, path.path())?;
                trace!("{path}: '{}' -> {target}", import.specifier);
                if self.claim(&target) {
                    discovered.push(target.clone());
                }
                node.edges.push(ModuleEdge {
                    specifier: import.specifier.clone(),
                    target,
                    kind: import.kind,
                });
            }
        }
        debug!("Loaded {path} ({} edge(s))", node.edges.len());
        Ok((node, discovered))
    }

    /// Claim `target` for loading; `false` when it was already claimed
    fn claim(&self, target: &ResolvedPath) -> bool {
        match self.slots.entry(target.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Slot::Claimed);
                true
            }
        }
    }
}

/// Arrange loaded nodes breadth-first from the entry, edges in source order
fn discovery_order(
    entry: &ResolvedPath,
    mut loaded: FxHashMap<ResolvedPath, ModuleNode>,
) -> IndexMap<ResolvedPath, ModuleNode> {
    let mut nodes = IndexMap::with_capacity(loaded.len());
    let mut queue = VecDeque::from([entry.clone()]);
    while let Some(path) = queue.pop_front() {
        let Some(node) = loaded.remove(&path) else {
            continue;
        };
        queue.extend(
            node.edges
                .iter()
                .filter(|edge| loaded.contains_key(&edge.target))
                .map(|edge| edge.target.clone()),
        );
        nodes.insert(path, node);
    }
    nodes
}

fn unresolvable(file: &Path, position: SourcePosition) -> Diagnostic {
    Diagnostic::UnresolvableDynamicImport {
        file: file.to_path_buf(),
        position,
    }
}

fn validate_json(file: &Path, content: &str) -> Result<()> {
    serde_json::from_str::<serde::de::IgnoredAny>(content)
        .map(|_| ())
        .map_err(|err| BundleError::Parse {
            file: file.to_path_buf(),
            position: SourcePosition {
                line: err.line() as u32,
                column: err.column().saturating_sub(1) as u32,
            },
            message: err.to_string(),
        })
}
