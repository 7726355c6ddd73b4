//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SRRS_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the caller)

use serde::{Deserialize, Serialize};
use srrs_protocol::{ProtocolVersion, DEFAULT_VERSION};
use srrs_trc::{Endpoint, PoolConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TRC connection settings.
    pub trc: TrcConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads `path` if given, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.trc.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.trc.apply_env_overrides()?;
        self.logging.apply_env_overrides();
        Ok(())
    }
}

/// TRC connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrcConfig {
    /// Unix socket TRC listens on.
    pub unix_socket: PathBuf,
    /// TCP address of TRC; takes precedence over the Unix socket.
    pub tcp_socket: Option<String>,
    /// Highest protocol version offered to TRC.
    pub protocol_version: ProtocolVersion,
    /// Liveness ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Minimum seconds between reconnect attempts.
    pub retry_interval_secs: u64,
}

impl Default for TrcConfig {
    fn default() -> Self {
        Self {
            unix_socket: std::env::temp_dir().join("trc.sock"),
            tcp_socket: None,
            protocol_version: DEFAULT_VERSION,
            ping_interval_secs: 5,
            retry_interval_secs: 5,
        }
    }
}

impl TrcConfig {
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("SRRS_UNIX_SOCKET") {
            self.unix_socket = PathBuf::from(path);
        }

        if let Ok(addr) = std::env::var("SRRS_TCP_SOCKET") {
            if !addr.is_empty() {
                self.tcp_socket = Some(addr);
            }
        }

        if let Ok(version) = std::env::var("SRRS_PROTOCOL_VERSION") {
            self.protocol_version = version
                .parse()
                .map_err(|_| ConfigError::InvalidVersion(version))?;
        }

        if let Ok(interval) = std::env::var("SRRS_PING_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.ping_interval_secs = secs;
            }
        }

        if let Ok(interval) = std::env::var("SRRS_RETRY_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.retry_interval_secs = secs;
            }
        }
        Ok(())
    }

    /// Rejects settings the connection engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval("ping_interval_secs"));
        }
        Ok(())
    }

    /// Returns the endpoint to dial.
    pub fn endpoint(&self) -> Endpoint {
        match &self.tcp_socket {
            Some(addr) => Endpoint::Tcp(addr.clone()),
            None => Endpoint::Unix(self.unix_socket.clone()),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_ping_interval(self.ping_interval())
            .with_retry_interval(self.retry_interval())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log at debug level unless RUST_LOG says otherwise.
    pub debug: bool,
}

impl LoggingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(debug) = std::env::var("SRRS_DEBUG") {
            self.debug = debug == "1" || debug.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0:?}: {1}")]
    ParseError(PathBuf, String),

    #[error("invalid protocol version: {0}")]
    InvalidVersion(String),

    #[error("{0} must be greater than zero")]
    InvalidInterval(&'static str),
}
