//! Configuration for doclink
//!
//! Where the document store lives and how items persist their edits.
//! Loaded from `config.toml` in the platform config directory, falling back
//! to defaults when the file does not exist.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclinkConfig {
    /// Document store settings
    pub store: StoreConfig,
    /// Item behavior settings
    pub item: ItemConfig,
}

/// Document store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file path. `None` means [`DoclinkConfig::default_store_path`].
    pub path: Option<PathBuf>,
    /// Keep documents in memory only
    pub in_memory: bool,
}

/// Item behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemConfig {
    /// Save after every property write
    pub autosave: bool,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self { autosave: true }
    }
}

impl DoclinkConfig {
    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`DoclinkConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// `<config dir>/doclink/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("doclink").join("config.toml"))
    }

    /// `<data dir>/doclink/documents.sqlite`
    pub fn default_store_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("doclink").join("documents.sqlite"))
    }

    /// The store path to open, after applying the default.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store.path.clone().or_else(Self::default_store_path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.in_memory && self.store.path.is_some() {
            return Err(ConfigError::Conflicting(
                "store.path cannot be combined with store.in_memory".to_string(),
            ));
        }
        if let Some(path) = &self.store.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Conflicting(
                    "store.path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Conflicting(String),
}
