use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::commands::reports::DEFAULT_POPULAR_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub popular_items_limit: usize,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_dir: PathBuf::from("./data"),
            database_file: "coffee.db".to_string(),
            popular_items_limit: DEFAULT_POPULAR_LIMIT,
            log_filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads a JSON config file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults overridden by `COFFEE_DATA_DIR`, `COFFEE_DATABASE_FILE`,
    /// `COFFEE_POPULAR_LIMIT` and `COFFEE_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(dir) = lookup("COFFEE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("COFFEE_DATABASE_FILE") {
            config.database_file = file;
        }
        if let Some(limit) = lookup("COFFEE_POPULAR_LIMIT") {
            config.popular_items_limit =
                limit.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "COFFEE_POPULAR_LIMIT".to_string(),
                    value: limit.clone(),
                })?;
        }
        if let Some(filter) = lookup("COFFEE_LOG") {
            config.log_filter = filter;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "database_file".to_string(),
                value: self.database_file.clone(),
            });
        }
        if self.popular_items_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "popular_items_limit".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}
