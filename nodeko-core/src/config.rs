//! Tool configuration.

use crate::error::{NodekoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Base image used when neither the config file nor the package manifest
/// names one.
pub const DEFAULT_BASE_IMAGE: &str = "node:lts-slim";

const CONFIG_FILENAME: &str = ".nodeko.json";
const CONFIG_PATH_ENV: &str = "NODEKO_CONFIG_PATH";
const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Persistent configuration for NODEKO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_base_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { default_base_image: DEFAULT_BASE_IMAGE.to_string() }
    }
}

impl Config {
    /// Get the path to the configuration file: `$NODEKO_CONFIG_PATH/.nodeko.json`
    /// when the variable is set, `./.nodeko.json` otherwise.
    pub fn config_path() -> PathBuf {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(dir) => PathBuf::from(dir).join(CONFIG_FILENAME),
            Err(_) => PathBuf::from(CONFIG_FILENAME),
        }
    }

    /// Load configuration from the default location. A missing file yields
    /// the defaults; a malformed file is an error.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| NodekoError::InvalidConfig {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| NodekoError::InvalidConfig {
            reason: format!("failed to parse {}: {}", path.display(), e),
        })
    }
}

/// The fixed creation time requested through `SOURCE_DATE_EPOCH`, if any.
pub fn creation_time_from_env() -> Result<Option<DateTime<Utc>>> {
    match std::env::var(SOURCE_DATE_EPOCH) {
        Ok(epoch) if !epoch.is_empty() => parse_epoch(&epoch).map(Some),
        _ => Ok(None),
    }
}

fn parse_epoch(epoch: &str) -> Result<DateTime<Utc>> {
    let seconds: i64 = epoch.parse().map_err(|e| NodekoError::InvalidConfig {
        reason: format!(
            "the environment variable SOURCE_DATE_EPOCH should be the number of seconds \
             since January 1st 1970, 00:00 UTC, got: {}",
            e
        ),
    })?;
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| NodekoError::InvalidConfig {
        reason: format!("SOURCE_DATE_EPOCH out of range: {}", seconds),
    })
}
