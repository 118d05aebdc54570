//! Shared type definitions for the stitch crate
//!
//! This module contains the identity types that flow between the resolver,
//! the graph builder and the emitter.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

/// Classification of a module by how its content is loaded and emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleKind {
    /// JavaScript or TypeScript source that is scanned for imports
    Script,

    /// JSON document exported as a value
    Json,

    /// Any other file, emitted as a side artifact
    Asset,
}

impl ModuleKind {
    const SCRIPT_EXTENSIONS: &'static [&'static str] =
        &["js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts"];

    /// Classify a file by its extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            Some(ext) if Self::SCRIPT_EXTENSIONS.contains(&ext) => Self::Script,
            _ => Self::Asset,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Self::Script)
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }

    pub fn is_asset(&self) -> bool {
        matches!(self, Self::Asset)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Json => write!(f, "json"),
            Self::Asset => write!(f, "asset"),
        }
    }
}

/// Role of a file in the bundle output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    /// The entry script carrying the runtime prelude
    Entry,
    /// A split chunk loaded on first dynamic import
    Chunk,
    SourceMap,
    Asset,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => f.pad("entry"),
            Self::Chunk => f.pad("chunk"),
            Self::SourceMap => f.pad("source map"),
            Self::Asset => f.pad("asset"),
        }
    }
}

/// The string a module uses to reference another module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleSpecifier(String);

impl ModuleSpecifier {
    pub fn new(specifier: impl Into<String>) -> Self {
        Self(specifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `./x`, `../x`, `.` and `..`
    pub fn is_relative(&self) -> bool {
        let s = self.as_str();
        s == "." || s == ".." || s.starts_with("./") || s.starts_with("../")
    }

    pub fn is_absolute(&self) -> bool {
        Path::new(self.as_str()).is_absolute()
    }

    /// Package names such as `lodash`, `lodash/fp` or `@scope/pkg/sub`
    pub fn is_bare(&self) -> bool {
        !self.0.is_empty() && !self.is_relative() && !self.is_absolute()
    }

    /// Split a bare specifier into its package name and optional subpath
    pub fn package_parts(&self) -> Option<(&str, Option<&str>)> {
        if !self.is_bare() {
            return None;
        }
        let s = self.as_str();
        let name_len = if s.starts_with('@') {
            let scope_end = s.find('/')?;
            s[scope_end + 1..]
                .find('/')
                .map_or(s.len(), |rest| scope_end + 1 + rest)
        } else {
            s.find('/').unwrap_or(s.len())
        };
        let (name, rest) = s.split_at(name_len);
        let subpath = rest.strip_prefix('/').filter(|sub| !sub.is_empty());
        Some((name, subpath))
    }
}

impl fmt::Display for ModuleSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleSpecifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A canonical on-disk location plus its module kind
///
/// The kind is a pure function of the path, so equality and hashing on the
/// whole struct are equivalent to comparing canonical paths. This is the
/// deduplication key of the module graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedPath {
    path: PathBuf,
    kind: ModuleKind,
}

impl ResolvedPath {
    /// Wrap an already canonicalized path
    pub fn new(canonical: PathBuf) -> Self {
        let kind = ModuleKind::from_path(&canonical);
        Self {
            path: canonical,
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Directory containing the module
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
