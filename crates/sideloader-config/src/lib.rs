#![deny(unsafe_code)]

//! Configuration loading and validation for snap-sideloader.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure: where the web service listens, which
//! snapd socket to dial, and the directory pre-staged snaps are read from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web service configuration.
    #[serde(default)]
    pub service: ServiceConfig,

    /// snapd connection and download directory.
    #[serde(default)]
    pub snapd: SnapdConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the inbound web service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the web service listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the web service listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    5000
}

/// Configuration for talking to snapd.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapdConfig {
    /// Path to the snapd Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Directory holding the pre-staged `<name>_<revision>.assert` and
    /// `<name>_<revision>.snap` files.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Deadline for a single snapd request in seconds (0 = no deadline).
    #[serde(default)]
    pub timeout_secs: u64,
}

impl SnapdConfig {
    /// The request deadline, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for SnapdConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            download_dir: default_download_dir(),
            timeout_secs: 0,
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/snapd.socket")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("/mnt")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.listen_port == 0 {
            return Err(ConfigError::Validation(
                "service.listen_port must be non-zero".to_string(),
            ));
        }
        if self.service.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "service.listen_addr must not be empty".to_string(),
            ));
        }
        if self.snapd.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "snapd.socket_path must not be empty".to_string(),
            ));
        }
        if self.snapd.download_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "snapd.download_dir must not be empty".to_string(),
            ));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        Ok(())
    }
}
