//! Source map composition
//!
//! Each unit already carries mappings from its generated lines back into its
//! module. Composition re-bases them by the unit's line offset and, when a
//! module ships its own source map, maps them one step further back through
//! that upstream map.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use sourcemap::{SourceMap, SourceMapBuilder};

use crate::{
    config::Config,
    emitter::Artifact,
    error::{BundleError, Result},
    fs::FileSystem,
    module_graph::{DependencyGraph, ModuleNode},
    util::{display_path, normalize_path},
};

/// Composes the source map of each artifact of one bundle
#[derive(Debug)]
pub struct SourceMapComposer<'a> {
    graph: &'a DependencyGraph,
    config: &'a Config,
    fs: &'a dyn FileSystem,
}

/// Source map under construction with interned sources and names
struct MapWriter {
    builder: SourceMapBuilder,
    sources: FxHashMap<String, u32>,
    names: FxHashMap<String, u32>,
    sources_content: bool,
}

impl MapWriter {
    fn new(file: &str, sources_content: bool) -> Self {
        Self {
            builder: SourceMapBuilder::new(Some(file)),
            sources: FxHashMap::default(),
            names: FxHashMap::default(),
            sources_content,
        }
    }

    fn source(&mut self, name: String, content: Option<&str>) -> u32 {
        if let Some(id) = self.sources.get(&name) {
            return *id;
        }
        let id = self.builder.add_source(&name);
        if self.sources_content {
            self.builder.set_source_contents(id, content);
        }
        self.sources.insert(name, id);
        id
    }

    fn name(&mut self, name: &str) -> u32 {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        let id = self.builder.add_name(name);
        self.names.insert(name.to_owned(), id);
        id
    }
}

impl<'a> SourceMapComposer<'a> {
    pub fn new(graph: &'a DependencyGraph, config: &'a Config, fs: &'a dyn FileSystem) -> Self {
        Self { graph, config, fs }
    }

    /// Source map v3 JSON for `artifact`
    pub fn compose(&self, artifact: &Artifact) -> Result<String> {
        let mut map = MapWriter::new(&artifact.name, self.config.sources_content);

        for unit in &artifact.units {
            let Some(node) = self.graph.node(&unit.path) else {
                continue;
            };
            let upstream = self.upstream_map(node);
            let own_name = display_path(node.path.path(), &self.config.root);
            let own_content = (!node.path.kind().is_asset()).then_some(node.content.as_str());
            let own = map.source(own_name, own_content);

            for segment in &unit.segments {
                let dst_line = unit.line_offset + segment.dst_line;
                let traced = upstream.as_ref().and_then(|upstream| {
                    let token = upstream.lookup_token(segment.src_line, segment.src_col)?;
                    let source = token.get_source()?;
                    let name = self.upstream_source_name(node, upstream, source);
                    let content = upstream.get_source_contents(token.get_src_id());
                    Some((name, content, token))
                });

                if let Some((name, content, token)) = traced {
                    let source = map.source(name, content);
                    let name = token.get_name().map(|name| map.name(name));
                    map.builder.add_raw(
                        dst_line,
                        segment.dst_col,
                        token.get_src_line(),
                        token.get_src_col(),
                        Some(source),
                        name,
                        false,
                    );
                } else {
                    map.builder.add_raw(
                        dst_line,
                        segment.dst_col,
                        segment.src_line,
                        segment.src_col,
                        Some(own),
                        None,
                        false,
                    );
                }
            }
        }

        let source_map = map.builder.into_sourcemap();
        debug!(
            "Source map for {} has {} source(s) and {} token(s)",
            artifact.name,
            source_map.get_source_count(),
            source_map.get_token_count()
        );
        let mut out = Vec::new();
        source_map
            .to_writer(&mut out)
            .map_err(|source| BundleError::SourceMap {
                artifact: artifact.name.clone(),
                source,
            })?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Load the map a module declares through `sourceMappingURL`
    ///
    /// A map that cannot be read or decoded is ignored with a warning.
    fn upstream_map(&self, node: &ModuleNode) -> Option<SourceMap> {
        let url = node.record.as_ref()?.source_map_url.as_deref()?;
        let bytes = if let Some(data) = url.strip_prefix("data:") {
            let Some((meta, payload)) = data.split_once(',') else {
                warn!("{}: malformed inline source map", node.path);
                return None;
            };
            if meta.ends_with(";base64") {
                match STANDARD.decode(payload.trim()) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!("{}: cannot decode inline source map: {err}", node.path);
                        return None;
                    }
                }
            } else {
                payload.as_bytes().to_vec()
            }
        } else {
            let path = node.path.dir().join(url);
            match self.fs.read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        "{}: cannot read source map {}: {err}",
                        node.path,
                        path.display()
                    );
                    return None;
                }
            }
        };

        match SourceMap::from_slice(&bytes) {
            Ok(map) => {
                debug!("{}: composing with upstream source map", node.path);
                Some(map)
            }
            Err(err) => {
                warn!("{}: ignoring invalid source map: {err}", node.path);
                None
            }
        }
    }

    /// Display name of an upstream source, relative to the project root
    fn upstream_source_name(&self, node: &ModuleNode, upstream: &SourceMap, source: &str) -> String {
        let base = match upstream.get_source_root() {
            Some(root) if !root.is_empty() => node.path.dir().join(root),
            _ => node.path.dir().to_path_buf(),
        };
        let path = normalize_path(&base.join(Path::new(source)));
        display_path(&path, &self.config.root)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        emitter::emit,
        fs::OsFileSystem,
        types::ResolvedPath,
        visitors::scan_module,
    };

    fn single_module_graph(name: &str, source: &str) -> DependencyGraph {
        let path = ResolvedPath::new(Path::new("/project").join(name));
        let record = scan_module(path.path(), source).expect("Failed to scan test module");
        let node = ModuleNode::new(path.clone(), source.to_owned(), Some(record));
        let nodes: IndexMap<_, _> = [(path.clone(), node)].into_iter().collect();
        DependencyGraph::new(path, nodes, Vec::new())
    }

    fn config() -> Config {
        Config {
            root: "/project".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_identity_mapping_round_trip() -> anyhow::Result<()> {
        let source = "const a = 1;\nconst b = a + 1;\nconsole.log(b);\n";
        let graph = single_module_graph("src/main.js", source);
        let config = config();
        let emission = emit(&graph, &config);
        let artifact = &emission.artifacts[0];
        let fs = OsFileSystem;
        let json = SourceMapComposer::new(&graph, &config, &fs).compose(artifact)?;

        let map = SourceMap::from_slice(json.as_bytes())?;
        assert_eq!(map.sources().collect::<Vec<_>>(), vec!["src/main.js"]);
        assert_eq!(map.get_source_contents(0), Some(source));

        let unit = &artifact.units[0];
        for line in 1..=3 {
            let token = map
                .lookup_token(unit.line_offset + line, 4)
                .expect("mapped line");
            assert_eq!(token.get_source(), Some("src/main.js"));
            assert_eq!(token.get_src_line(), line - 1);
        }
        Ok(())
    }

    #[test]
    fn test_inline_upstream_map_is_composed() -> anyhow::Result<()> {
        // Generated line 0 maps to line 4 of original.ts
        let upstream = r#"{"version":3,"sources":["original.ts"],"names":[],"mappings":"AAIA"}"#;
        let encoded = STANDARD.encode(upstream);
        let source = format!(
            "console.log(1);\n//# sourceMappingURL=data:application/json;base64,{encoded}\n"
        );
        let graph = single_module_graph("out/compiled.js", &source);
        let config = config();
        let emission = emit(&graph, &config);
        let artifact = &emission.artifacts[0];
        let fs = OsFileSystem;
        let json = SourceMapComposer::new(&graph, &config, &fs).compose(artifact)?;

        let map = SourceMap::from_slice(json.as_bytes())?;
        let unit = &artifact.units[0];
        let token = map
            .lookup_token(unit.line_offset + 1, 0)
            .expect("mapped line");
        assert_eq!(token.get_source(), Some("out/original.ts"));
        assert_eq!(token.get_src_line(), 4);
        Ok(())
    }

    #[test]
    fn test_unreadable_upstream_map_falls_back_to_identity() -> anyhow::Result<()> {
        let source = "console.log(1);\n//# sourceMappingURL=missing.js.map\n";
        let graph = single_module_graph("lib.js", source);
        let config = config();
        let emission = emit(&graph, &config);
        let artifact = &emission.artifacts[0];
        let fs = OsFileSystem;
        let json = SourceMapComposer::new(&graph, &config, &fs).compose(artifact)?;

        let map = SourceMap::from_slice(json.as_bytes())?;
        let unit = &artifact.units[0];
        let token = map
            .lookup_token(unit.line_offset + 1, 3)
            .expect("mapped line");
        assert_eq!(token.get_source(), Some("lib.js"));
        assert_eq!(token.get_src_line(), 0);
        // The upstream comment is not carried into the bundle
        assert!(!artifact.code.contains("missing.js.map"));
        Ok(())
    }
}
