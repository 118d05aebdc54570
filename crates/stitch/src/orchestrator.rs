//! Bundle operations exposed to the command layer
//!
//! A [`Bundler`] holds configuration and collaborators only. Every operation
//! creates its own resolver memo and visited map, so two operations running
//! at the same time share nothing mutable.

use std::{path::Path, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Serialize, Serializer};

use crate::{
    config::Config,
    emitter::emit,
    error::{BundleError, ResolutionError, Result},
    fs::{FileSystem, OsFileSystem},
    graph_builder::GraphBuilder,
    module_graph::DependencyGraph,
    package_json::{JsonManifestReader, ManifestReader},
    resolver::ModuleResolver,
    source_map::SourceMapComposer,
    types::{ArtifactKind, ModuleSpecifier, ResolvedPath},
};

/// Contents of an output file
///
/// Serializes as a string; binary contents are base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Text(String),
    Binary(Vec<u8>),
}

impl FileData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for FileData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Binary(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
        }
    }
}

/// One output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub kind: ArtifactKind,
    pub content: FileData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub content: String,
}

/// The entry script and its source map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryOutput {
    pub js: FileContent,
    pub source_map: FileContent,
}

/// Every artifact of one bundle, keyed by virtual file name
///
/// `files` lists the entry, its source map, each chunk followed by its map,
/// then assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleManifest {
    pub files: IndexMap<String, OutputFile>,
    pub entry: EntryOutput,
}

impl BundleManifest {
    /// Total size of all files in bytes
    pub fn total_size(&self) -> usize {
        self.files.values().map(|file| file.content.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Bundler {
    config: Arc<Config>,
    fs: Arc<dyn FileSystem>,
    manifests: Arc<dyn ManifestReader>,
}

impl Bundler {
    /// Bundler reading from the operating system's file system
    pub fn new(config: Config) -> Self {
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem);
        let manifests = Arc::new(JsonManifestReader::new(Arc::clone(&fs)));
        Self::with_collaborators(config, fs, manifests)
    }

    pub fn with_collaborators(
        config: Config,
        fs: Arc<dyn FileSystem>,
        manifests: Arc<dyn ManifestReader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            fs,
            manifests,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn resolver(&self) -> ModuleResolver {
        ModuleResolver::new(
            Arc::clone(&self.config),
            Arc::clone(&self.fs),
            Arc::clone(&self.manifests),
        )
    }

    /// Resolve the entry file name relative to the configured root
    pub fn get_resolved_entry(&self, entry: &str) -> Result<ResolvedPath> {
        let root = &self.config.root;
        let candidate = root.join(entry);
        let specifier = ModuleSpecifier::new(candidate.to_string_lossy());
        let importer = root.join("<entry>");
        debug!("Resolving entry {entry} from {}", root.display());

        self.resolver()
            .resolve(&specifier, &importer)
            .map_err(|err| match err {
                BundleError::Resolution(ResolutionError::NotFound { .. }) => {
                    ResolutionError::NotFound {
                        specifier: entry.to_owned(),
                        from_file: root.clone(),
                    }
                    .into()
                }
                other => other,
            })
    }

    /// Build the dependency graph reachable from `entry`
    pub fn build_graph(&self, entry: &ResolvedPath) -> Result<DependencyGraph> {
        let resolver = self.resolver();
        let graph = GraphBuilder::new(&resolver, Arc::clone(&self.fs)).build(entry)?;
        debug!("Resolver memoized {} lookup(s)", resolver.cached_len());
        Ok(graph)
    }

    /// Bundle everything reachable from `entry`
    ///
    /// Fails without producing any file when a module cannot be resolved,
    /// read or parsed.
    pub fn bundle_manifest(&self, entry: &ResolvedPath) -> Result<BundleManifest> {
        info!("Bundling {}", display_entry(entry.path(), &self.config.root));
        let graph = self.build_graph(entry)?;
        let emission = emit(&graph, &self.config);
        let composer = SourceMapComposer::new(&graph, &self.config, self.fs.as_ref());

        let mut manifest = BundleManifest::default();
        for artifact in &emission.artifacts {
            let source_map = composer.compose(artifact)?;
            if artifact.kind == ArtifactKind::Entry {
                manifest.entry = EntryOutput {
                    js: FileContent {
                        content: artifact.code.clone(),
                    },
                    source_map: FileContent {
                        content: source_map.clone(),
                    },
                };
            }
            manifest.files.insert(
                artifact.name.clone(),
                OutputFile {
                    kind: artifact.kind,
                    content: FileData::Text(artifact.code.clone()),
                },
            );
            manifest.files.insert(
                artifact.source_map_name(),
                OutputFile {
                    kind: ArtifactKind::SourceMap,
                    content: FileData::Text(source_map),
                },
            );
        }
        for asset in emission.assets {
            manifest.files.insert(
                asset.name,
                OutputFile {
                    kind: ArtifactKind::Asset,
                    content: FileData::Binary(asset.content),
                },
            );
        }

        info!(
            "Bundled {} module(s) into {} file(s), {} bytes",
            graph.len(),
            manifest.files.len(),
            manifest.total_size()
        );
        Ok(manifest)
    }
}

fn display_entry(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
