//! Error taxonomy for bundle operations
//!
//! Resolution, parse and I/O failures are fatal: they abort the whole bundle
//! operation and no partial output is ever returned. Cycles and unresolvable
//! dynamic imports are not errors; they are reported as
//! [`crate::module_graph::Diagnostic`]s instead.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Result type alias for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;

/// A 1-based line and 0-based column inside a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure to map a specifier onto a file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("cannot find module '{specifier}' imported from {}", from_file.display())]
    NotFound {
        specifier: String,
        from_file: PathBuf,
    },

    #[error("package '{specifier}' has an ambiguous entry point: {reason}")]
    AmbiguousPackage { specifier: String, reason: String },
}

impl ResolutionError {
    /// The specifier that failed to resolve
    pub fn specifier(&self) -> &str {
        match self {
            Self::NotFound { specifier, .. } | Self::AmbiguousPackage { specifier, .. } => {
                specifier
            }
        }
    }
}

/// Main error type for all bundle operations
#[derive(Error, Debug)]
pub enum BundleError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("failed to parse {}:{position}: {message}", file.display())]
    Parse {
        file: PathBuf,
        position: SourcePosition,
        message: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode source map for {artifact}: {source}")]
    SourceMap {
        artifact: String,
        #[source]
        source: sourcemap::Error,
    },

    #[error("failed to start module loader pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl BundleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the resolution failure if this error is one
    pub fn as_resolution(&self) -> Option<&ResolutionError> {
        match self {
            Self::Resolution(err) => Some(err),
            _ => None,
        }
    }
}
