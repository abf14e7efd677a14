//! Configuration file support for otapush.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (OTAPUSH_*)
//! 3. Local config file (./otapush.toml)
//! 4. Global config file (~/.config/otapush/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bus id of the default target node.
    pub target: Option<u8>,
    /// Name of the coordinator's bus module.
    pub bus: Option<String>,
    /// Name of the broadcast expander in front of the target.
    pub expander: Option<String>,
    /// Maximum chunk size in bytes.
    pub chunk_size: Option<usize>,
    /// Maximum number of unacknowledged chunks in flight.
    pub window: Option<usize>,
    /// Seconds to wait for READY after BEGIN.
    pub ready_timeout: Option<u64>,
    /// Seconds to wait for each ACK.
    pub ack_timeout: Option<u64>,
    /// Seconds to wait for DONE after COMMIT.
    pub done_timeout: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("otapush.toml")) {
            debug!("Loaded local config from otapush.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "otapush").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.transfer.target.is_some() {
            self.transfer.target = other.transfer.target;
        }
        if other.transfer.bus.is_some() {
            self.transfer.bus = other.transfer.bus;
        }
        if other.transfer.expander.is_some() {
            self.transfer.expander = other.transfer.expander;
        }
        if other.transfer.chunk_size.is_some() {
            self.transfer.chunk_size = other.transfer.chunk_size;
        }
        if other.transfer.window.is_some() {
            self.transfer.window = other.transfer.window;
        }
        if other.transfer.ready_timeout.is_some() {
            self.transfer.ready_timeout = other.transfer.ready_timeout;
        }
        if other.transfer.ack_timeout.is_some() {
            self.transfer.ack_timeout = other.transfer.ack_timeout;
        }
        if other.transfer.done_timeout.is_some() {
            self.transfer.done_timeout = other.transfer.done_timeout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.transfer.target.is_none());
        assert!(config.transfer.bus.is_none());
        assert!(config.transfer.expander.is_none());
        assert!(config.transfer.chunk_size.is_none());
        assert!(config.transfer.window.is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_serial() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.transfer.target = Some(5);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.transfer.target, Some(5));
    }

    #[test]
    fn test_config_merge_baud() {
        let mut base = Config::default();
        base.connection.baud = Some(115200);

        let mut other = Config::default();
        other.connection.baud = Some(460800);

        base.merge(other);
        assert_eq!(base.connection.baud, Some(460800));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.transfer.expander = Some("p0".to_string());

        let other = Config::default(); // all None
        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.transfer.expander.as_deref(), Some("p0"));
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 115200

[transfer]
target = 5
bus = "lizard"
expander = "p0"
chunk_size = 128
window = 4
ack_timeout = 20
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.transfer.target, Some(5));
        assert_eq!(config.transfer.bus.as_deref(), Some("lizard"));
        assert_eq!(config.transfer.expander.as_deref(), Some("p0"));
        assert_eq!(config.transfer.chunk_size, Some(128));
        assert_eq!(config.transfer.window, Some(4));
        assert_eq!(config.transfer.ack_timeout, Some(20));
        assert!(config.transfer.ready_timeout.is_none());
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.transfer.target.is_none());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let toml_str = r#"
[transfer]
target = 9
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.connection.serial.is_none());
        assert_eq!(config.transfer.target, Some(9));
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        config.connection.baud = Some(460800);
        config.transfer.target = Some(3);
        config.transfer.bus = Some("bus0".to_string());

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(deserialized.connection.baud, Some(460800));
        assert_eq!(deserialized.transfer.target, Some(3));
        assert_eq!(deserialized.transfer.bus.as_deref(), Some("bus0"));
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyUSB1"
[transfer]
target = 7
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.transfer.target, Some(7));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        // Should return default
        assert!(config.connection.serial.is_none());
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_is_some() {
        // On most systems this should return Some
        let path = Config::global_config_path();
        if let Some(p) = path {
            assert!(p.to_str().unwrap().contains("otapush"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
