//! # Error Types Module
//!
//! Error types for the fallible edges of PearWatch: the platform BLE scanner
//! and the configuration file. Nothing here is fatal to the process; callers
//! log these and carry on.
//!
//! ## Error Types
//! - `ScanError`: Bluetooth manager, adapter and scan failures
//! - `ConfigError`: Configuration file I/O and parsing errors

use std::fmt;

/// Errors reported by a scan source
#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapters available
    NoAdapters,
    /// The platform refused access to the Bluetooth radio
    PermissionDenied,
    /// Scan operation failed
    ScanFailed(String),
}

impl ScanError {
    /// Maps a btleplug failure, keeping permission denial distinguishable.
    pub fn from_btleplug(context: &str, error: btleplug::Error) -> Self {
        match error {
            btleplug::Error::PermissionDenied => ScanError::PermissionDenied,
            other => ScanError::ScanFailed(format!("{}: {}", context, other)),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            ScanError::NoAdapters => {
                write!(f, "No Bluetooth adapters found. Please ensure Bluetooth is enabled.")
            }
            ScanError::PermissionDenied => {
                write!(f, "Bluetooth permission not granted")
            }
            ScanError::ScanFailed(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
