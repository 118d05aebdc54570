use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::{debug, trace};

use crate::{
    config::Config,
    error::{BundleError, ResolutionError, Result},
    fs::FileSystem,
    package_json::{MANIFEST_FILE_NAME, ManifestReader, PackageEntry, PackageManifest},
    types::{ModuleSpecifier, ResolvedPath},
};

/// A package directory located for a bare specifier
#[derive(Debug)]
struct PackageLocation {
    dir: PathBuf,
    manifest: Option<PackageManifest>,
}

/// Maps specifiers onto canonical files
///
/// Resolution order for relative and absolute specifiers:
/// 1. the literal path
/// 2. the literal path with each configured extension appended
/// 3. `index.<ext>` inside the literal path, same extension order
///
/// Bare specifiers are first matched against the nearest enclosing package
/// (self-reference), then looked up in `node_modules` directories of every
/// ancestor of the importing file, nearest first.
///
/// One resolver belongs to one bundle operation. Its memo is keyed by
/// `(specifier, importing file)` and is safe to share between loader threads.
#[derive(Debug)]
pub struct ModuleResolver {
    config: Arc<Config>,
    fs: Arc<dyn FileSystem>,
    manifests: Arc<dyn ManifestReader>,
    cache: DashMap<(ModuleSpecifier, PathBuf), ResolvedPath>,
}

impl ModuleResolver {
    pub fn new(
        config: Arc<Config>,
        fs: Arc<dyn FileSystem>,
        manifests: Arc<dyn ManifestReader>,
    ) -> Self {
        Self {
            config,
            fs,
            manifests,
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of memoized resolutions
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Resolve `specifier` as written in `from_file`
    pub fn resolve(&self, specifier: &ModuleSpecifier, from_file: &Path) -> Result<ResolvedPath> {
        let key = (specifier.clone(), from_file.to_path_buf());
        if let Some(cached) = self.cache.get(&key) {
            trace!("Resolution cache hit for '{specifier}' from {}", from_file.display());
            return Ok(cached.clone());
        }

        let resolved = self.resolve_uncached(specifier, from_file)?;
        debug!(
            "Resolved '{specifier}' from {} to {resolved}",
            from_file.display()
        );
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn resolve_uncached(
        &self,
        specifier: &ModuleSpecifier,
        from_file: &Path,
    ) -> Result<ResolvedPath> {
        let not_found = || ResolutionError::NotFound {
            specifier: specifier.to_string(),
            from_file: from_file.to_path_buf(),
        };
        let from_dir = from_file.parent().unwrap_or(from_file);

        let found = if specifier.as_str().is_empty() {
            None
        } else if specifier.is_relative() || specifier.is_absolute() {
            self.probe_path(&from_dir.join(specifier.as_str()))
        } else {
            self.resolve_bare(specifier, from_dir)?
        };

        let path = found.ok_or_else(not_found)?;
        self.canonicalize(&path)
    }

    /// Resolve a package name, optionally followed by a subpath
    fn resolve_bare(
        &self,
        specifier: &ModuleSpecifier,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some((name, subpath)) = specifier.package_parts() else {
            return Ok(None);
        };
        let Some(package) = self.find_package(name, from_dir)? else {
            trace!("No package directory for '{name}' above {}", from_dir.display());
            return Ok(None);
        };

        if let Some(subpath) = subpath {
            return Ok(self.probe_path(&package.dir.join(subpath)));
        }

        let Some(manifest) = &package.manifest else {
            return Ok(self.probe_index(&package.dir));
        };
        match manifest.entry(&self.config.main_fields) {
            PackageEntry::Declared { field, value } => {
                trace!("Package '{name}' declares {field} = {value}");
                let entry = package.dir.join(value);
                Ok(self
                    .probe_path(&entry)
                    .or_else(|| self.probe_index(&package.dir)))
            }
            PackageEntry::Undeclared => Ok(self.probe_index(&package.dir)),
            PackageEntry::Invalid { reason, .. } => Err(ResolutionError::AmbiguousPackage {
                specifier: specifier.to_string(),
                reason,
            }
            .into()),
        }
    }

    /// Locate the directory of package `name` as seen from `from_dir`
    fn find_package(&self, name: &str, from_dir: &Path) -> Result<Option<PackageLocation>> {
        // Self-reference: only the nearest enclosing package boundary counts
        for dir in from_dir.ancestors() {
            let manifest_path = dir.join(MANIFEST_FILE_NAME);
            if let Some(manifest) = self.manifests.read_manifest(&manifest_path)? {
                if manifest.name.as_deref() == Some(name) {
                    return Ok(Some(PackageLocation {
                        dir: dir.to_path_buf(),
                        manifest: Some(manifest),
                    }));
                }
                break;
            }
        }

        for dir in from_dir.ancestors() {
            if dir.file_name().is_some_and(|file| file == "node_modules") {
                continue;
            }
            let candidate = dir.join("node_modules").join(name);
            if self.fs.is_dir(&candidate) {
                let manifest = self
                    .manifests
                    .read_manifest(&candidate.join(MANIFEST_FILE_NAME))?;
                return Ok(Some(PackageLocation {
                    dir: candidate,
                    manifest,
                }));
            }
        }
        Ok(None)
    }

    /// Probe the literal path, then with each extension, then as a directory
    fn probe_path(&self, base: &Path) -> Option<PathBuf> {
        if self.fs.is_file(base) {
            return Some(base.to_path_buf());
        }
        for ext in &self.config.extensions {
            let mut candidate = OsString::from(base.as_os_str());
            candidate.push(".");
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            trace!("Probing {}", candidate.display());
            if self.fs.is_file(&candidate) {
                return Some(candidate);
            }
        }
        self.probe_index(base)
    }

    fn probe_index(&self, dir: &Path) -> Option<PathBuf> {
        if !self.fs.is_dir(dir) {
            return None;
        }
        self.config
            .extensions
            .iter()
            .map(|ext| dir.join(format!("index.{ext}")))
            .find(|candidate| self.fs.is_file(candidate))
    }

    fn canonicalize(&self, path: &Path) -> Result<ResolvedPath> {
        self.fs
            .canonicalize(path)
            .map(ResolvedPath::new)
            .map_err(|err| BundleError::io(path, err))
    }
}
