//! Error types for the tunnel core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a tunnel device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open /dev/net/tun: {0}")]
    Open(#[source] io::Error),

    #[error("TUN device name too long: {0} (max 15 chars)")]
    NameTooLong(String),

    #[error("Failed to configure TUN device '{0}': {1}")]
    Configure(String, #[source] io::Error),

    #[error("Failed to read from tunnel device: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("Tunnel device is closed")]
    Closed,
}

/// Errors surfaced to the caller of `open()`.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Tunnel device unavailable: {0}")]
    DeviceUnavailable(#[source] DeviceError),

    #[error("Tunnel is already open")]
    AlreadyRunning,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {}", .0.display(), .1)]
    Read(PathBuf, #[source] io::Error),

    #[error("Failed to parse config file {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
