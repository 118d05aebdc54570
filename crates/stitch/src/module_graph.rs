//! Dependency graph of one bundle operation
//!
//! Nodes live in an arena keyed by [`ResolvedPath`]; edges refer to their
//! targets by key, never by owning link. Node order is the breadth-first
//! discovery order from the entry, following edges in source order, so the
//! graph looks the same however many workers built it.

use std::{fmt, path::PathBuf};

use indexmap::IndexMap;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::{
    error::SourcePosition,
    types::{ModuleSpecifier, ResolvedPath},
    visitors::{ImportKind, ModuleRecord},
};

/// A resolved reference from one module to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEdge {
    pub specifier: ModuleSpecifier,
    pub target: ResolvedPath,
    pub kind: ImportKind,
}

/// One unique module of the graph
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub path: ResolvedPath,
    /// Text as loaded, never modified; empty for asset modules
    pub content: String,
    /// Bytes of an asset module, which is copied rather than parsed
    pub bytes: Vec<u8>,
    /// SHA-256 of the content or bytes (hex-encoded)
    pub content_hash: String,
    /// Outgoing edges in source order
    pub edges: Vec<ModuleEdge>,
    /// Scan result; `None` for json and asset modules
    pub record: Option<ModuleRecord>,
}

impl ModuleNode {
    pub fn new(path: ResolvedPath, content: String, record: Option<ModuleRecord>) -> Self {
        let content_hash = content_hash(content.as_bytes());
        Self {
            path,
            content,
            bytes: Vec::new(),
            content_hash,
            edges: Vec::new(),
            record,
        }
    }

    /// Node for an asset module holding its raw bytes
    pub fn asset(path: ResolvedPath, bytes: Vec<u8>) -> Self {
        let content_hash = content_hash(&bytes);
        Self {
            path,
            content: String::new(),
            bytes,
            content_hash,
            edges: Vec::new(),
            record: None,
        }
    }

    /// Where `specifier` resolved to, if it is an internal reference
    pub fn target_of(&self, specifier: &ModuleSpecifier) -> Option<&ResolvedPath> {
        self.edges
            .iter()
            .find(|edge| edge.specifier == *specifier)
            .map(|edge| &edge.target)
    }

    /// Targets that must be initialized before this module runs
    pub fn static_targets(&self) -> impl Iterator<Item = &ResolvedPath> {
        self.edges
            .iter()
            .filter(|edge| edge.kind.is_static())
            .map(|edge| &edge.target)
    }

    /// Targets only reached through `import()`
    pub fn dynamic_targets(&self) -> impl Iterator<Item = &ResolvedPath> {
        self.edges
            .iter()
            .filter(|edge| !edge.kind.is_static())
            .map(|edge| &edge.target)
    }
}

/// Hex-encoded SHA-256 digest
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Non-fatal findings collected while building the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Modules forming a strongly connected component, in graph order
    CycleDetected { members: Vec<PathBuf> },
    /// `import(expr)` or `require(expr)` with a non-literal argument
    UnresolvableDynamicImport {
        file: PathBuf,
        position: SourcePosition,
    },
}

impl Diagnostic {
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::UnresolvableDynamicImport { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { members } => {
                let names: Vec<_> = members
                    .iter()
                    .map(|member| member.display().to_string())
                    .collect();
                write!(f, "circular dependency: {}", names.join(" -> "))
            }
            Self::UnresolvableDynamicImport { file, position } => write!(
                f,
                "{}:{position}: dynamic import with a non-literal specifier is left untouched",
                file.display()
            ),
        }
    }
}

/// Every module reachable from the entry
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    entry: ResolvedPath,
    nodes: IndexMap<ResolvedPath, ModuleNode>,
    diagnostics: Vec<Diagnostic>,
}

impl DependencyGraph {
    /// Assemble a graph and record its cycles
    ///
    /// `nodes` must already be in discovery order and contain every edge
    /// target.
    pub fn new(
        entry: ResolvedPath,
        nodes: IndexMap<ResolvedPath, ModuleNode>,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Self {
        debug_assert!(
            nodes
                .values()
                .flat_map(|node| &node.edges)
                .all(|edge| nodes.contains_key(&edge.target)),
            "dangling edge in dependency graph"
        );
        let mut graph = Self {
            entry,
            nodes,
            diagnostics: Vec::new(),
        };
        for members in graph.cycles() {
            diagnostics.push(Diagnostic::CycleDetected {
                members: members.iter().map(|path| path.path().to_path_buf()).collect(),
            });
        }
        graph.diagnostics = diagnostics;
        graph
    }

    pub fn entry(&self) -> &ResolvedPath {
        &self.entry
    }

    pub fn node(&self, path: &ResolvedPath) -> Option<&ModuleNode> {
        self.nodes.get(path)
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of a node in discovery order
    pub fn discovery_index(&self, path: &ResolvedPath) -> Option<usize> {
        self.nodes.get_index_of(path)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Strongly connected components with more than one member, plus
    /// self-importing modules
    ///
    /// Members are listed in discovery order and components are ordered by
    /// their first member.
    pub fn cycles(&self) -> Vec<Vec<&ResolvedPath>> {
        let mut graph = DiGraph::<usize, ()>::with_capacity(self.nodes.len(), 0);
        let indices: FxHashMap<&ResolvedPath, _> = self
            .nodes
            .keys()
            .enumerate()
            .map(|(idx, path)| (path, graph.add_node(idx)))
            .collect();
        let mut self_loops = Vec::new();
        for (idx, node) in self.nodes.values().enumerate() {
            let from = indices[&node.path];
            for edge in &node.edges {
                if edge.target == node.path {
                    self_loops.push(idx);
                }
                graph.update_edge(from, indices[&edge.target], ());
            }
        }

        let mut components: Vec<Vec<usize>> = tarjan_scc(&graph)
            .into_iter()
            .map(|component| {
                let mut members: Vec<usize> =
                    component.into_iter().map(|node| graph[node]).collect();
                members.sort_unstable();
                members
            })
            .filter(|members| members.len() > 1 || self_loops.contains(&members[0]))
            .collect();
        components.sort_unstable();

        components
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .filter_map(|idx| self.nodes.get_index(idx).map(|(path, _)| path))
                    .collect()
            })
            .collect()
    }
}
