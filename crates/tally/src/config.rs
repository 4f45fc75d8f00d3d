//! Configuration
//!
//! Layered with figment: built-in defaults, then a TOML file, then `TALLY_`
//! environment variables (nested keys split on `__`, e.g.
//! `TALLY_TRACKER__CACHE_KEY`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tally_plugins::{
    DEFAULT_TRACKER_CACHE_KEY, DEFAULT_TRACKER_HOOK_PATTERNS, TrackerFilter, TrackerSettings,
};

use crate::error::{Error, Result};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "tally.toml";

/// Top-level configuration (tally.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Installed plugins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory holding `<plugin>/plugin.json` manifests
    #[serde(default = "default_plugins_dir")]
    pub dir: PathBuf,
    /// Plugins loaded at startup; empty means every installed plugin
    #[serde(default)]
    pub activated: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
            activated: Vec::new(),
        }
    }
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

/// Tracker activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_cache_key")]
    pub cache_key: String,
    /// Name patterns never loaded for tracking
    #[serde(default)]
    pub plugins_not_to_load: Vec<String>,
    /// Hook patterns that make a plugin tracker-relevant
    #[serde(default = "default_hook_patterns")]
    pub hook_patterns: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cache_key: default_cache_key(),
            plugins_not_to_load: Vec::new(),
            hook_patterns: default_hook_patterns(),
        }
    }
}

fn default_cache_key() -> String {
    DEFAULT_TRACKER_CACHE_KEY.to_string()
}

fn default_hook_patterns() -> Vec<String> {
    DEFAULT_TRACKER_HOOK_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl TrackerConfig {
    /// Controller settings for this configuration
    pub fn settings(&self) -> TrackerSettings {
        TrackerSettings {
            cache_key: self.cache_key.clone(),
            plugins_not_to_load: self.plugins_not_to_load.clone(),
        }
    }

    /// Relevance filter for this configuration
    pub fn filter(&self) -> TrackerFilter {
        TrackerFilter::with_hook_patterns(&self.hook_patterns)
    }
}

/// Where the eager cache is persisted between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process memory only
    Memory,
    /// JSON files in `cache.dir`
    #[default]
    File,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./tmp/cache")
}

impl TallyConfig {
    /// Provider stack for the given config file
    ///
    /// Without an explicit path, `tally.toml` is used if present.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

        Figment::from(Serialized::defaults(TallyConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("TALLY_").split("__"))
    }

    /// Load configuration
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        let config = Self::figment(path).extract()?;
        Ok(config)
    }
}
