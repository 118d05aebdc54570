//! Package manifest collaborator used for bare-specifier resolution

use std::{fmt, path::Path, sync::Arc};

use serde_json::Value;

use crate::{
    error::{BundleError, Result, SourcePosition},
    fs::FileSystem,
};

pub const MANIFEST_FILE_NAME: &str = "package.json";

/// The parts of a `package.json` the resolver cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageManifest {
    pub name: Option<String>,
    fields: serde_json::Map<String, Value>,
}

/// Outcome of looking up the declared entry of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEntry<'a> {
    /// The first configured field that is present
    Declared { field: &'a str, value: &'a str },
    /// None of the configured fields is present
    Undeclared,
    /// A configured field is present but not a usable path
    Invalid { field: &'a str, reason: String },
}

impl PackageManifest {
    /// Parse a manifest document
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        let fields = match serde_json::from_str(json)? {
            Value::Object(fields) => fields,
            _ => serde_json::Map::new(),
        };
        let name = fields
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        Ok(Self { name, fields })
    }

    /// Look up the package entry using `main_fields` in priority order
    pub fn entry<'a>(&'a self, main_fields: &'a [String]) -> PackageEntry<'a> {
        for field in main_fields {
            match self.fields.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(value)) if !value.trim().is_empty() => {
                    return PackageEntry::Declared { field, value };
                }
                Some(Value::String(_)) => {
                    return PackageEntry::Invalid {
                        field,
                        reason: format!("field '{field}' is empty"),
                    };
                }
                Some(other) => {
                    return PackageEntry::Invalid {
                        field,
                        reason: format!("field '{field}' must be a string, found {other}"),
                    };
                }
            }
        }
        PackageEntry::Undeclared
    }
}

/// Reads package manifests on behalf of the resolver
pub trait ManifestReader: Send + Sync + fmt::Debug {
    /// Read the manifest at `path`; `Ok(None)` when there is none
    fn read_manifest(&self, path: &Path) -> Result<Option<PackageManifest>>;
}

/// [`ManifestReader`] parsing `package.json` files through a [`FileSystem`]
#[derive(Debug, Clone)]
pub struct JsonManifestReader {
    fs: Arc<dyn FileSystem>,
}

impl JsonManifestReader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl ManifestReader for JsonManifestReader {
    fn read_manifest(&self, path: &Path) -> Result<Option<PackageManifest>> {
        if !self.fs.is_file(path) {
            return Ok(None);
        }
        let content = self
            .fs
            .read_to_string(path)
            .map_err(|err| BundleError::io(path, err))?;
        PackageManifest::parse(&content)
            .map(Some)
            .map_err(|err| BundleError::Parse {
                file: path.to_path_buf(),
                position: SourcePosition {
                    line: err.line() as u32,
                    column: err.column().saturating_sub(1) as u32,
                },
                message: err.to_string(),
            })
    }
}
