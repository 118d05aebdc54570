//! File-system collaborator used by the resolver and the graph builder
//!
//! The bundler core never touches `std::fs` directly; everything goes through
//! [`FileSystem`] so callers can supply a virtual or instrumented file system.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

/// Read-only file-system operations the bundler needs
pub trait FileSystem: Send + Sync + fmt::Debug {
    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Raw bytes, for files that are copied rather than parsed
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Absolute path with all symlinks and `..` components resolved
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// [`FileSystem`] backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}
