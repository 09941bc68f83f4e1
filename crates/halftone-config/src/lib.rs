//! Runtime configuration for the halftone cache.
//!
//! Configuration is loaded from TOML and shared through a cloneable
//! [`ConfigHandle`]. Components read flags through the handle at the moment
//! they need them, so a [`ConfigHandle::replace`] (e.g. on a config-file
//! reload) takes effect on the very next operation — the cache index never
//! caches the file-monitoring flag across calls.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level halftone configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Settings for the in-memory cache index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheSettings {
    /// Whether cache entries backed by local files are invalidated when the
    /// underlying file changes.
    ///
    /// Each monitored file pins an OS watch handle for as long as its entry
    /// lives, so monitoring is opt-in.
    #[serde(default = "default_monitor_file_changes")]
    pub monitor_file_changes: bool,
}

fn default_monitor_file_changes() -> bool {
    false
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            monitor_file_changes: default_monitor_file_changes(),
        }
    }
}

impl Config {
    /// Parses a TOML document.
    ///
    /// Unknown keys are not an error; they are logged so typos in config
    /// files are visible without breaking older/newer deployments.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let deserializer = toml::Deserializer::new(text);
        let mut unknown = Vec::new();
        let config = serde_ignored::deserialize(deserializer, |path| {
            unknown.push(path.to_string());
        })?;
        for key in &unknown {
            tracing::warn!(target: "halftone.config", key = %key, "ignoring unknown config key");
        }
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// JSON schema for [`Config`], for editor completion and validation tooling.
pub fn json_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Config)
}

/// Cloneable live view of the current [`Config`].
///
/// Clones share the same underlying configuration; replacing it through any
/// clone is observed by all of them.
#[derive(Clone, Debug, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// A copy of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.inner.read().clone()
    }

    /// Replaces the current configuration.
    pub fn replace(&self, config: Config) {
        *self.inner.write() = config;
    }

    /// Current value of `cache.monitor_file_changes`.
    pub fn monitor_file_changes(&self) -> bool {
        self.inner.read().cache.monitor_file_changes
    }
}
