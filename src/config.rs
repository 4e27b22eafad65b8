//! Engine configuration, loadable from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::planner::PlannerConfig;
use crate::query::stats::StatsConfig;

/// Settings for planning and statistics sampling.
///
/// Every field has a default, so a file only needs the keys it changes:
///
/// ```toml
/// [planner]
/// max_nesting_depth = 2
///
/// [stats]
/// sample_size = 500
/// seed = 7
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate enumeration and ranking.
    pub planner: PlannerConfig,
    /// Statistics sampling.
    pub stats: StatsConfig,
}

/// Failure to load or write an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read engine config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The contents are not a valid config.
    #[error("failed to parse engine config: {source}")]
    Parse {
        /// Parser error with location.
        source: toml::de::Error,
    },
    /// The config could not be rendered as TOML.
    #[error("failed to serialize engine config: {source}")]
    Serialize {
        /// Serializer error.
        source: toml::ser::Error,
    },
}

impl EngineConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse { source })
    }

    /// Reads the config at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Renders the config as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}
