//! Bundler configuration
//!
//! Configuration is layered, later layers overriding earlier ones:
//! built-in defaults, the user config (`<config dir>/stitch/stitch.toml`),
//! the project `stitch.toml` in the root directory, and finally an explicit
//! file passed by the caller. Every layer is a partial TOML document.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use etcetera::BaseStrategy;
use indexmap::IndexSet;
use log::debug;
use serde::{Deserialize, Serialize};

/// File name looked up in the project root and the user config directory
pub const CONFIG_FILE_NAME: &str = "stitch.toml";

/// How reachable modules are distributed over output artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Every module goes into the entry artifact
    #[default]
    Single,

    /// Modules only reachable through `import()` go into side chunks
    Dynamic,
}

impl std::str::FromStr for SplitPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(format!(
                "unknown split policy '{other}', expected 'single' or 'dynamic'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory specifiers of the entry and source map paths are relative to
    pub root: PathBuf,
    /// Extensions probed after the literal path, in priority order
    pub extensions: Vec<String>,
    /// `package.json` fields naming a package entry, in priority order
    pub main_fields: Vec<String>,
    /// Bare specifiers left to the runtime `require`
    pub externals: IndexSet<String>,
    pub split: SplitPolicy,
    /// Worker threads used to load modules; `None` uses available parallelism
    pub jobs: Option<usize>,
    /// Virtual file name of the entry artifact
    pub entry_name: String,
    /// Embed original sources in the source map
    pub sources_content: bool,
    /// Report cycles at info level instead of debug
    pub diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: ["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"]
                .into_iter()
                .map(String::from)
                .collect(),
            main_fields: vec!["module".into(), "main".into()],
            externals: IndexSet::new(),
            split: SplitPolicy::Single,
            jobs: None,
            entry_name: "index.js".into(),
            sources_content: true,
            diagnostics: false,
        }
    }
}

/// One partial configuration layer as it appears on disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    root: Option<PathBuf>,
    extensions: Option<Vec<String>>,
    main_fields: Option<Vec<String>>,
    externals: Option<Vec<String>>,
    split: Option<SplitPolicy>,
    jobs: Option<usize>,
    entry_name: Option<String>,
    sources_content: Option<bool>,
    diagnostics: Option<bool>,
}

impl Config {
    /// Load the layered configuration for a project rooted at `root`
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        if let Some(user_file) = user_config_file() {
            config.merge_file_if_exists(&user_file)?;
        }
        config.merge_file_if_exists(&root.join(CONFIG_FILE_NAME))?;
        if let Some(path) = explicit {
            config.merge_file(path)?;
        }

        // A relative `root` inside a file is relative to the project root
        if config.root.is_relative() {
            config.root = root.join(&config.root);
        }
        Ok(config)
    }

    /// Parse a TOML document and apply it on top of this configuration
    pub fn merge_toml(&mut self, document: &str) -> Result<()> {
        let layer: ConfigLayer = toml::from_str(document).context("invalid configuration")?;
        self.apply(layer);
        Ok(())
    }

    fn merge_file_if_exists(&mut self, path: &Path) -> Result<()> {
        if path.is_file() {
            self.merge_file(path)?;
        }
        Ok(())
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        debug!("Loading configuration from {}", path.display());
        let document = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        self.merge_toml(&document)
            .with_context(|| format!("in config file {}", path.display()))
    }

    fn apply(&mut self, layer: ConfigLayer) {
        if let Some(root) = layer.root {
            self.root = root;
        }
        if let Some(extensions) = layer.extensions {
            self.extensions = extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_owned())
                .collect();
        }
        if let Some(main_fields) = layer.main_fields {
            self.main_fields = main_fields;
        }
        if let Some(externals) = layer.externals {
            self.externals.extend(externals);
        }
        if let Some(split) = layer.split {
            self.split = split;
        }
        if layer.jobs.is_some() {
            self.jobs = layer.jobs;
        }
        if let Some(entry_name) = layer.entry_name {
            self.entry_name = entry_name;
        }
        if let Some(sources_content) = layer.sources_content {
            self.sources_content = sources_content;
        }
        if let Some(diagnostics) = layer.diagnostics {
            self.diagnostics = diagnostics;
        }
    }

    /// Whether `specifier` names an external package or one of its subpaths
    pub fn is_external(&self, specifier: &str) -> bool {
        self.externals.iter().any(|external| {
            specifier == external
                || specifier
                    .strip_prefix(external.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Number of loader threads to use
    pub fn effective_jobs(&self) -> usize {
        self.jobs.filter(|jobs| *jobs > 0).unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }
}

fn user_config_file() -> Option<PathBuf> {
    etcetera::choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("stitch").join(CONFIG_FILE_NAME))
}
