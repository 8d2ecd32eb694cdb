//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Paths to the graph topology and test-suite files
    #[serde(default)]
    pub graph: GraphConfig,

    /// Default run settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Graph and suite file locations
#[derive(Debug, Deserialize, Default)]
pub struct GraphConfig {
    /// JSON file describing the node topology the daemon hosts
    pub flows: Option<PathBuf>,

    /// JSON file holding the test suites
    pub suites: Option<PathBuf>,
}

/// Default run settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Timeout for a test-case run in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Global action-count ceiling per run
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_actions: default_max_actions(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    crate::suite::DEFAULT_TIMEOUT_MS
}
fn default_max_actions() -> usize {
    crate::suite::DEFAULT_MAX_ACTIONS
}

/// Daemon configuration
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Auto-exit after this many minutes with no client activity
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    })?;
                return toml::from_str(&content)
                    .map_err(|e| super::Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }
}
