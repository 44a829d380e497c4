use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::logging;
use crate::utils;

/// Current configuration version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Defaults to a `logs` directory next to the database
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Upper bound on how long `watch` sleeps between passes
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Policy for tasks added without `--every` or `--at`
    #[serde(default = "default_interval")]
    pub default_interval: String,
    #[serde(default = "default_config_version")]
    pub config_version: Option<u32>,
    /// Directory of the loaded config file; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            log_dir: None,
            tick_interval_secs: default_tick_interval_secs(),
            default_interval: default_interval(),
            config_version: Some(CURRENT_CONFIG_VERSION),
            base_dir: None,
        }
    }
}

// Default value functions
fn default_database_path() -> String {
    // Fallback only; load() replaces it with the profile's path
    Config::default_database_path_for_profile(utils::Profile::Prod)
}

fn default_log_level() -> String {
    logging::default_log_level().to_string()
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_interval() -> String {
    "24h".to_string()
}

fn default_config_version() -> Option<u32> {
    Some(CURRENT_CONFIG_VERSION)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config directory: {0}")]
    ConfigDirError(String),
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Invalid default_interval: {0}")]
    InvalidInterval(#[from] utils::ParseError),
}

impl Config {
    /// Load configuration from the profile's config file, or create it with defaults if missing
    pub fn load_with_profile(profile: utils::Profile) -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path(profile)?;
        Self::load_from_path(&config_path, profile)
    }

    /// Load configuration from an explicit file, or create it with defaults if missing
    pub fn load_from_path(config_path: &Path, profile: utils::Profile) -> Result<Self, ConfigError> {
        let base_dir = std::path::absolute(config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .parent()
            .map(Path::to_path_buf);

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(config_path)
                .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            let mut config: Config = toml::from_str(&contents)?;

            // An emptied path falls back to the profile's database
            if config.database_path.trim().is_empty() {
                config.database_path = Self::default_database_path_for_profile(profile);
            }
            config
        } else {
            let mut config = Config::default();
            config.database_path = Self::default_database_path_for_profile(profile);
            config.save_to_path(config_path)?;
            config
        };
        config.base_dir = base_dir;
        Ok(config)
    }

    pub fn save_to_path(&mut self, config_path: &Path) -> Result<(), ConfigError> {
        // Ensure config version is set before saving
        self.config_version = Some(CURRENT_CONFIG_VERSION);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(format!("Failed to serialize config: {}", e)))?;

        fs::write(config_path, toml_string)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn get_config_path(profile: utils::Profile) -> Result<PathBuf, ConfigError> {
        let config_dir = utils::get_config_dir(profile)
            .ok_or_else(|| ConfigError::ConfigDirError("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get default database path for a specific profile
    fn default_database_path_for_profile(profile: utils::Profile) -> String {
        if let Some(data_dir) = utils::get_data_dir(profile) {
            data_dir.join("checkloop.db").to_string_lossy().to_string()
        } else {
            match profile {
                utils::Profile::Dev => "~/.local/share/checkloop-dev/checkloop.db".to_string(),
                utils::Profile::Prod => "~/.local/share/checkloop/checkloop.db".to_string(),
            }
        }
    }

    /// Get the absolute database path (with ~ expansion)
    pub fn get_database_path(&self) -> PathBuf {
        self.resolve(&self.database_path)
    }

    /// Get the absolute log directory
    pub fn get_log_dir(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => self.resolve(dir),
            None => {
                let db_path = self.get_database_path();
                db_path
                    .parent()
                    .map(|p| p.join("logs"))
                    .unwrap_or_else(|| self.resolve("logs"))
            }
        }
    }

    /// Expand `~`, then anchor relative paths at the config file's directory
    /// (or the working directory when no file was loaded).
    fn resolve(&self, path: &str) -> PathBuf {
        let expanded = utils::expand_path(path);
        if expanded.is_absolute() {
            return expanded;
        }
        match &self.base_dir {
            Some(base) => base.join(expanded),
            None => std::path::absolute(&expanded).unwrap_or(expanded),
        }
    }

    /// `tick_interval_secs` as a duration, never shorter than one second
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// `default_interval` parsed to milliseconds
    pub fn default_interval_ms(&self) -> Result<u64, ConfigError> {
        Ok(utils::parse_interval(&self.default_interval)?)
    }
}
