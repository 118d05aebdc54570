//! Topological emission of a dependency graph into output artifacts
//!
//! The emitter orders the graph, assigns every module to an artifact,
//! rewrites each module into a registry unit and concatenates the units,
//! recording where each one starts so the source map composer can re-base
//! the unit's mappings.

mod chunks;
mod order;
mod rewrite;
mod runtime;

use std::path::{Component, Path};

use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashMap;

pub use self::{
    chunks::{ChunkPlan, ENTRY_ARTIFACT},
    order::emission_order,
    rewrite::Segment,
};
use self::rewrite::{LinkContext, RenderedUnit, render_unit};
use crate::{
    config::Config,
    module_graph::{DependencyGraph, ModuleNode},
    types::{ArtifactKind, ResolvedPath},
};

/// One module placed in an artifact
#[derive(Debug, Clone)]
pub struct EmissionUnit {
    pub path: ResolvedPath,
    /// Registry id, equal to the module's position in the emission order
    pub id: usize,
    pub byte_offset: usize,
    pub byte_len: usize,
    /// 0-based line of the unit header in the artifact
    pub line_offset: u32,
    pub line_count: u32,
    /// Mappings relative to the unit's first line
    pub segments: Vec<Segment>,
}

impl EmissionUnit {
    /// Whether `line` of the artifact belongs to this unit
    pub fn contains_line(&self, line: u32) -> bool {
        (self.line_offset..self.line_offset + self.line_count).contains(&line)
    }
}

/// A generated JavaScript file
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub code: String,
    pub units: Vec<EmissionUnit>,
}

impl Artifact {
    /// Virtual file name of the artifact's source map
    pub fn source_map_name(&self) -> String {
        format!("{}.map", self.name)
    }
}

/// A content-addressed copy of an asset module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub name: String,
    pub content: Vec<u8>,
}

/// Everything the emitter produced for one graph
#[derive(Debug, Clone)]
pub struct Emission {
    /// The entry artifact first, then side chunks in chunk order
    pub artifacts: Vec<Artifact>,
    /// Deduplicated assets in emission order
    pub assets: Vec<AssetFile>,
}

impl Emission {
    pub fn entry(&self) -> Option<&Artifact> {
        self.artifacts.first()
    }
}

/// Builds one artifact while tracking byte and line offsets
struct ArtifactWriter {
    artifact: Artifact,
    line: u32,
}

impl ArtifactWriter {
    fn new(name: String, kind: ArtifactKind) -> Self {
        Self {
            artifact: Artifact {
                name,
                kind,
                code: String::new(),
                units: Vec::new(),
            },
            line: 0,
        }
    }

    fn push_lines(&mut self, text: &str) {
        self.artifact.code.push_str(text);
        self.line += text.matches('\n').count() as u32;
    }

    fn push_unit(&mut self, path: &ResolvedPath, id: usize, unit: RenderedUnit) {
        let byte_offset = self.artifact.code.len();
        let line_offset = self.line;
        self.push_lines(&unit.text);
        self.artifact.units.push(EmissionUnit {
            path: path.clone(),
            id,
            byte_offset,
            byte_len: unit.text.len(),
            line_offset,
            line_count: unit.line_count,
            segments: unit.segments,
        });
    }

    fn finish(mut self) -> Artifact {
        let map_name = self.artifact.source_map_name();
        let relative = Path::new(&map_name)
            .file_name()
            .map_or_else(|| map_name.clone(), |name| name.to_string_lossy().into_owned());
        self.push_lines(&runtime::source_map_comment(&relative));
        self.artifact
    }
}

/// Content-addressed output name of an asset module
pub fn asset_file_name(node: &ModuleNode) -> String {
    let path = node.path.path();
    let stem = path
        .file_stem()
        .map_or_else(|| "asset".into(), |stem| stem.to_string_lossy());
    let hash = node.content_hash.get(..8).unwrap_or(&node.content_hash);
    match path.extension() {
        Some(ext) => format!("assets/{stem}-{hash}.{}", ext.to_string_lossy()),
        None => format!("assets/{stem}-{hash}"),
    }
}

/// Prefix leading from the directory of the entry artifact to the output root
fn output_root(entry_name: &str) -> String {
    let depth = Path::new(entry_name).parent().map_or(0, |dir| {
        dir.components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .count()
    });
    "../".repeat(depth)
}

/// Order, split, rewrite and concatenate every module of `graph`
pub fn emit(graph: &DependencyGraph, config: &Config) -> Emission {
    let order = emission_order(graph);
    let ids: FxHashMap<&ResolvedPath, usize> = order
        .iter()
        .enumerate()
        .map(|(idx, path)| (*path, idx))
        .collect();
    let plan = ChunkPlan::new(graph, &order, config.split);

    // Assets with identical content share the file named after the first one
    let mut assets: IndexMap<String, Vec<u8>> = IndexMap::new();
    let mut by_hash: FxHashMap<&str, String> = FxHashMap::default();
    let mut asset_names: FxHashMap<&ResolvedPath, String> = FxHashMap::default();
    for node in order.iter().filter_map(|path| graph.node(path)) {
        if node.path.kind().is_asset() {
            let name = by_hash
                .entry(node.content_hash.as_str())
                .or_insert_with(|| {
                    let name = asset_file_name(node);
                    assets.insert(name.clone(), node.bytes.clone());
                    name
                })
                .clone();
            asset_names.insert(&node.path, name);
        }
    }

    let output_root = output_root(&config.entry_name);
    let link = LinkContext {
        ids: &ids,
        plan: &plan,
        asset_names: &asset_names,
        output_root: &output_root,
    };

    let mut writers = Vec::with_capacity(plan.chunk_count() + 1);
    let mut entry = ArtifactWriter::new(config.entry_name.clone(), ArtifactKind::Entry);
    entry.push_lines(runtime::PRELUDE);
    entry.push_lines(runtime::BINDINGS);
    writers.push(entry);
    for index in 0..plan.chunk_count() {
        let mut chunk = ArtifactWriter::new(ChunkPlan::chunk_name(index), ArtifactKind::Chunk);
        chunk.push_lines(runtime::CHUNK_HEADER);
        chunk.push_lines(runtime::BINDINGS);
        writers.push(chunk);
    }

    for path in &order {
        let Some(node) = graph.node(path) else {
            continue;
        };
        let id = ids[path];
        let unit = render_unit(node, id, &link);
        writers[plan.owner(path)].push_unit(path, id, unit);
    }

    let entry_id = ids.get(graph.entry()).copied().unwrap_or_default();
    writers[ENTRY_ARTIFACT].push_lines(&runtime::entry_epilogue(entry_id));

    let artifacts: Vec<Artifact> = writers.into_iter().map(ArtifactWriter::finish).collect();
    debug!(
        "Emitted {} module(s) into {} artifact(s) and {} asset(s)",
        order.len(),
        artifacts.len(),
        assets.len()
    );

    Emission {
        artifacts,
        assets: assets
            .into_iter()
            .map(|(name, content)| AssetFile { name, content })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_asset_file_name_is_content_addressed() {
        let node = ModuleNode::asset(
            ResolvedPath::new("/project/img/logo.svg".into()),
            b"<svg/>".to_vec(),
        );
        let name = asset_file_name(&node);
        assert!(name.starts_with("assets/logo-"));
        assert!(name.ends_with(".svg"));
        assert_eq!(name.len(), "assets/logo-".len() + 8 + ".svg".len());

        let same_content = ModuleNode::asset(
            ResolvedPath::new("/project/other/logo.svg".into()),
            b"<svg/>".to_vec(),
        );
        assert_eq!(asset_file_name(&same_content), name);
    }

    #[test]
    fn test_output_root_climbs_out_of_the_entry_directory() {
        assert_eq!(output_root("index.js"), "");
        assert_eq!(output_root("./index.js"), "");
        assert_eq!(output_root("js/app/index.js"), "../../");
    }
}
