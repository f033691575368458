//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `scan_on_startup`: Start scanning as soon as the app launches
//! - `restore_last_device`: Re-select the last device after a restart
//! - `last_device`: The device that was selected when the app last ran
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/pear-watch/config.toml
//! - Linux: ~/.config/pear-watch/config.toml
//! - Windows: %APPDATA%\pear-watch\config.toml

use crate::device::Device;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan_on_startup: bool,
    pub restore_last_device: bool,
    pub last_device: Option<Device>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_on_startup: true,
            restore_last_device: true,
            last_device: None,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pear-watch")
            .join("config.toml")
    }

    /// Load config from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::ParseFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to `path`, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
