//! Tunnel configuration
//!
//! Loaded from a JSON file; every field has a default so an empty object
//! (or no file at all) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blocklist::{Blocklist, DEFAULT_SEPARATOR, EmptyUpdatePolicy};
use crate::error::ConfigError;
use crate::packet::{DEFAULT_MTU, MIN_IP_HEADER_SIZE};

/// Default TUN device name
pub const DEFAULT_DEVICE_NAME: &str = "tunmode0";

/// Default poll timeout. This bounds how long `close()` takes to be noticed.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Upper bound for the poll timeout
pub const MAX_POLL_TIMEOUT_MS: u64 = 2000;

/// Upper bound for reader threads per session
pub const MAX_WORKERS: usize = 16;

const MAX_MTU: usize = 65535;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Interface name
    pub name: String,
    /// Read buffer capacity per packet
    pub mtu: usize,
    /// Set IFF_UP after opening
    pub bring_up: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            mtu: DEFAULT_MTU,
            bring_up: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// Separator for delimited updates
    pub separator: char,
    /// Entries installed at startup
    pub seed: Vec<String>,
    /// Handling of updates that contain no entries
    pub on_empty: EmptyUpdatePolicy,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            seed: Vec::new(),
            on_empty: EmptyUpdatePolicy::Clear,
        }
    }
}

impl BlocklistConfig {
    pub fn build(&self) -> Blocklist {
        Blocklist::with_policy(self.separator, self.on_empty.clone()).seeded(&self.seed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub device: DeviceConfig,
    pub poll_timeout_ms: u64,
    /// Reader threads per session
    pub workers: usize,
    pub blocklist: BlocklistConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            workers: 1,
            blocklist: BlocklistConfig::default(),
        }
    }
}

impl TunnelConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.name.is_empty() {
            return Err(ConfigError::Invalid("device name is required".to_string()));
        }
        if !(MIN_IP_HEADER_SIZE..=MAX_MTU).contains(&self.device.mtu) {
            return Err(ConfigError::Invalid(format!(
                "mtu {} out of range {MIN_IP_HEADER_SIZE}..={MAX_MTU}",
                self.device.mtu
            )));
        }
        if !(1..=MAX_POLL_TIMEOUT_MS).contains(&self.poll_timeout_ms) {
            return Err(ConfigError::Invalid(format!(
                "poll_timeout_ms {} out of range 1..={MAX_POLL_TIMEOUT_MS}",
                self.poll_timeout_ms
            )));
        }
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::Invalid(format!(
                "workers {} out of range 1..={MAX_WORKERS}",
                self.workers
            )));
        }
        if self.blocklist.separator.is_whitespace() {
            return Err(ConfigError::Invalid(
                "blocklist separator must not be whitespace".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TunnelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.workers, 1);
        assert_eq!(config.device.mtu, DEFAULT_MTU);
        assert_eq!(config.blocklist.on_empty, EmptyUpdatePolicy::Clear);
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: TunnelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TunnelConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "device": {{ "name": "tun7", "bring_up": false }},
                "poll_timeout_ms": 250,
                "blocklist": {{
                    "seed": ["10.0.0.5"],
                    "on_empty": {{ "policy": "fallback", "entries": ["192.168.0.102"] }}
                }}
            }}"#
        )
        .unwrap();

        let config = TunnelConfig::load(file.path()).unwrap();
        assert_eq!(config.device.name, "tun7");
        assert!(!config.device.bring_up);
        assert_eq!(config.device.mtu, DEFAULT_MTU);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.blocklist.separator, ',');

        let blocklist = config.blocklist.build();
        assert!(blocklist.contains("10.0.0.5"));
        blocklist.update("");
        assert!(blocklist.contains("192.168.0.102"));
    }

    #[test]
    fn test_load_errors() {
        let missing = TunnelConfig::load(Path::new("/nonexistent/tunmode.json"));
        assert!(matches!(missing, Err(ConfigError::Read(..))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            TunnelConfig::load(file.path()),
            Err(ConfigError::Parse(..))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "workers": 0 }}"#).unwrap();
        assert!(matches!(
            TunnelConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_error_messages_name_the_file() {
        let err = TunnelConfig::load(Path::new("/nonexistent/tunmode.json")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to read config file /nonexistent/tunmode.json: "));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[").unwrap();
        let err = TunnelConfig::load(file.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(&file.path().display().to_string()));
        assert!(msg.starts_with("Failed to parse config file "));
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = TunnelConfig::default();
        config.poll_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.poll_timeout_ms = 5000;
        assert!(config.validate().is_err());
        config.poll_timeout_ms = 2000;
        assert!(config.validate().is_ok());

        config.device.mtu = 10;
        assert!(config.validate().is_err());
        config.device.mtu = 1500;

        config.workers = MAX_WORKERS + 1;
        assert!(config.validate().is_err());
        config.workers = 4;

        config.blocklist.separator = ' ';
        assert!(config.validate().is_err());
        config.blocklist.separator = ';';

        config.device.name.clear();
        assert!(config.validate().is_err());
    }
}
