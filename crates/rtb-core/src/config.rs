//! Bridge configuration.
//!
//! Loaded once at startup from a TOML file and immutable afterwards.
//! Every field has a default matching the original deployment, so an
//! absent file yields a runnable configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::door::AccessoryInfo;

/// Default Unix socket the daemon listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rtb.sock";

/// Errors loading the bridge configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Accessory name shown to the host.
    pub name: String,

    /// Door serial number (display only).
    pub door_serial_number: String,

    /// Directory that relative command names are resolved against.
    pub script_dir: PathBuf,

    /// Monitor helper executable.
    pub monitor_command: PathBuf,

    /// Script invoked to open the door.
    pub open_command: PathBuf,

    /// Script invoked to close the door.
    pub close_command: PathBuf,

    /// Status file path passed to the open/close scripts.
    pub status_file: PathBuf,

    /// Report STOPPED as CLOSED instead of as a jam.
    pub ignore_errors: bool,

    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,

    /// Temperature sensor settings.
    pub sensor: SensorConfig,
}

/// DS18B20 temperature sensor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    /// 1-wire bus master directory.
    pub path: PathBuf,

    /// Sensor serial number. Empty means auto-detect from the bus
    /// master's slave listing.
    pub serial: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "Garage Door".to_string(),
            door_serial_number: "(not set)".to_string(),
            script_dir: PathBuf::from("/usr/local/libexec/rollertec"),
            monitor_command: PathBuf::from("garagedoormonitor"),
            open_command: PathBuf::from("opendoor.sh"),
            close_command: PathBuf::from("closedoor.sh"),
            status_file: PathBuf::from("/var/run/garagedoorstatus"),
            ignore_errors: false,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sensor: SensorConfig::default(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/sys/bus/w1/devices/w1_bus_master1"),
            serial: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads configuration, falling back to defaults when the file does
    /// not exist. Other read errors still fail.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Absolute path to the monitor helper.
    #[must_use]
    pub fn monitor_path(&self) -> PathBuf {
        resolve(&self.script_dir, &self.monitor_command)
    }

    /// Absolute path to the open script.
    #[must_use]
    pub fn open_path(&self) -> PathBuf {
        resolve(&self.script_dir, &self.open_command)
    }

    /// Absolute path to the close script.
    #[must_use]
    pub fn close_path(&self) -> PathBuf {
        resolve(&self.script_dir, &self.close_command)
    }

    /// Accessory identification derived from this configuration.
    #[must_use]
    pub fn accessory(&self) -> AccessoryInfo {
        AccessoryInfo::new(&self.name, &self.door_serial_number)
    }
}

fn resolve(dir: &Path, command: &Path) -> PathBuf {
    if command.is_absolute() {
        command.to_path_buf()
    } else {
        dir.join(command)
    }
}
