//! Configuration management for tagcap.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults; every section tolerates missing fields via serde defaults.

mod types;
mod validate;

pub use types::*;

use crate::coverage::CoverageOptions;
use crate::error::ConfigError;
use crate::request::Templates;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for tagcap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Refinement loop and dispatcher settings
    pub processing: ProcessingConfig,

    /// Credential pool settings
    pub pool: PoolConfig,

    /// Remote service settings
    pub service: ServiceConfig,

    /// Coverage validator thresholds
    pub coverage: CoverageOptions,

    /// Prompt templates
    pub templates: Templates,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.tagcap.tagcap/config.toml
    /// - Linux: ~/.config/tagcap/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\tagcap\config\config.toml
    ///
    /// Falls back to ~/.tagcap/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "tagcap", "tagcap")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".tagcap").join("config.toml")
            })
    }

    /// Get the resolved credentials file path (with ~ expansion).
    pub fn credentials_file(&self) -> Option<PathBuf> {
        self.pool.credentials_file.as_ref().map(|path| {
            let binding = path.to_string_lossy().into_owned();
            let expanded = shellexpand::tilde(&binding);
            PathBuf::from(expanded.into_owned())
        })
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
