//! Configuration management for the agent tree.
//!
//! Configuration can be set via environment variables:
//! - `TREE_TOKEN_BUDGET` - Optional. Global token budget split across the leaves. Defaults to `100000`.
//! - `TREE_CONFIG_PATH` - Optional. Config document loaded on `initialize`. Defaults to `config/settings.yaml`.
//! - `TREE_PARALLEL_FANOUT` - Optional. Query both children concurrently when a node fans out. Defaults to `true`.
//! - `TREE_SETTINGS_FILE` - Optional. YAML settings file. Values in it are overridden by the variables above.
//!
//! The settings file may additionally carry initial weight factors per leaf:
//!
//! ```yaml
//! total_budget: 80000
//! weights:
//!   M211:
//!     priority: 8
//!     complexity: 1.5
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::budget::WeightFactors;
use crate::util::parse_bool;

pub const DEFAULT_TOTAL_BUDGET: u64 = 100_000;
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read settings file {0}: {1}")]
    SettingsFile(PathBuf, String),
}

/// On-disk settings. Every field is optional so a file can override a subset.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    total_budget: Option<u64>,
    config_path: Option<String>,
    parallel_fanout: Option<bool>,
    #[serde(default)]
    weights: BTreeMap<String, WeightFactors>,
}

/// Tree configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Global token budget distributed across all leaves
    pub total_budget: u64,

    /// Config document path handed to the infrastructure subtree on `initialize`
    pub config_path: String,

    /// Whether internal nodes query both children concurrently when fanning out
    pub parallel_fanout: bool,

    /// Initial weight factors per leaf id, applied before the first distribution
    pub initial_weights: BTreeMap<String, WeightFactors>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_BUDGET)
    }
}

impl Config {
    /// Create a config with the given budget and defaults for everything else.
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            config_path: DEFAULT_CONFIG_PATH.to_string(),
            parallel_fanout: true,
            initial_weights: BTreeMap::new(),
        }
    }

    /// Load configuration from environment variables (and the settings file, if named).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed and
    /// `ConfigError::SettingsFile` if the settings file is unreadable or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TREE_SETTINGS_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };

        if let Ok(raw) = std::env::var("TREE_TOKEN_BUDGET") {
            config.total_budget = raw.trim().parse().map_err(|e| {
                ConfigError::InvalidValue("TREE_TOKEN_BUDGET".to_string(), format!("{}", e))
            })?;
        }

        if let Ok(path) = std::env::var("TREE_CONFIG_PATH") {
            config.config_path = path;
        }

        if let Ok(raw) = std::env::var("TREE_PARALLEL_FANOUT") {
            config.parallel_fanout = parse_bool(&raw);
        }

        Ok(config)
    }

    /// Load configuration from a YAML settings file, using defaults for absent keys.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::SettingsFile(path.to_path_buf(), e.to_string()))?;
        Self::from_yaml_str(&content)
            .map_err(|e| ConfigError::SettingsFile(path.to_path_buf(), e.to_string()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes as unit, not as an empty map.
        let settings: SettingsFile = if content.trim().is_empty() {
            SettingsFile::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let mut config = Self::default();
        if let Some(budget) = settings.total_budget {
            config.total_budget = budget;
        }
        if let Some(path) = settings.config_path {
            config.config_path = path;
        }
        if let Some(parallel) = settings.parallel_fanout {
            config.parallel_fanout = parallel;
        }
        config.initial_weights = settings.weights;
        Ok(config)
    }
}
