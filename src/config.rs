//! # Configuration Management Module
//!
//! Persistent settings for the provisioning tool, stored in the platform's
//! config directory. Handles loading, saving, and providing defaults.
//!
//! ## Settings
//! - `backend_url`: base URL of the sensor backend
//! - `product_name`: advertised name of unprovisioned sensors
//! - `scan_poll_interval_ms`: how often the scanner polls the adapter
//! - `operation_timeout_secs`: bound on each connect/discover/read/write
//! - `request_timeout_secs`: bound on the registration HTTP call
//! - `[gatt]`: service and characteristic UUIDs
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/sensor-provision/config.toml
//! - Linux: ~/.config/sensor-provision/config.toml
//! - Windows: %APPDATA%\sensor-provision\config.toml
//!
//! Session tokens are never written here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::gatt::{GattProfile, PRODUCT_NAME};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub product_name: String,
    pub scan_poll_interval_ms: u64,
    pub operation_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub gatt: GattProfile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            product_name: PRODUCT_NAME.to_string(),
            scan_poll_interval_ms: 500,
            operation_timeout_secs: 10,
            request_timeout_secs: 15,
            gatt: GattProfile::default(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-provision")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing the default there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)
                    .map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string)
            .map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn scan_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan_poll_interval_ms.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
