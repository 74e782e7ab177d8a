//! Configuration: where the database file lives.
//!
//! Read from a TOML file such as
//!
//! ```toml
//! [database]
//! plugin = "simple"
//! path = "/var/lib/songtree/db"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend name. Only `"simple"` exists; absent means the same.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Path of the database file. Required.
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            plugin: None,
            path: Some(path.into()),
        }
    }

    /// The configured database file, or an error if the settings are unusable.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(plugin) = self.plugin.as_deref() {
            if plugin != crate::SimpleDatabase::PLUGIN_NAME {
                return Err(ConfigError::UnknownPlugin(plugin.to_string()));
            }
        }
        self.path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingPath)
    }
}

/// Default location of the config file, inside the app data directory.
pub fn default_config_path() -> Option<PathBuf> {
    Some(app_data::app_data_dir()?.join(CONFIG_FILENAME))
}

/// Load config from `path`. A missing file yields the default (empty) config.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
    };
    toml::from_str(&s).map_err(ConfigError::Parse)
}

/// Save config to `path`.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

/// Set and persist the database path in the config file at `config_path`.
pub fn set_database_path(config_path: &Path, db_path: &Path) -> Result<(), ConfigError> {
    let mut config = load_config(config_path)?;
    config.database.path = Some(db_path.to_string_lossy().into_owned());
    save_config(config_path, &config)
}


#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no \"path\" parameter specified")]
    MissingPath,
    #[error("unknown database plugin: {0}")]
    UnknownPlugin(String),
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}
