//! Configuration for the trackstream daemon and clients
//!
//! Loads configuration from a TOML file. Every field has a default, so a
//! partial file (or none at all) is valid.

use crate::error::{Error, Result};
use crate::streaming::transport::{INET_BUDGET, LOCAL_BUDGET, TransportKind};
use crate::streaming::wire::WireFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub datastream: DatastreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Datagram transport and pipeline pacing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatastreamConfig {
    /// Socket family: `local` (domain socket) or `inet` (UDP)
    #[serde(default)]
    pub kind: TransportKind,

    /// Address the server binds
    ///
    /// Examples:
    /// - `/tmp/trackstream.sock` - local domain socket path
    /// - `127.0.0.1:9000` - UDP on localhost
    #[serde(default = "default_address")]
    pub server_address: String,

    /// Address clients send to (usually the same as `server_address`)
    #[serde(default = "default_address")]
    pub client_address: String,

    /// Encoding of datagram payloads; client and server must agree
    #[serde(default)]
    pub wire_format: WireFormat,

    /// Pause after each client send (seconds)
    #[serde(default = "default_client_send_throttle")]
    pub client_send_throttle: f64,

    /// Pause between receive polls and after each datagram (seconds)
    #[serde(default = "default_server_recv_throttle")]
    pub server_recv_throttle: f64,

    /// Pause between writer drains (seconds); also the warm-up delay
    #[serde(default = "default_writer_persist_throttle")]
    pub writer_persist_throttle: f64,
}

fn default_address() -> String {
    "/tmp/trackstream.sock".to_string()
}

fn default_client_send_throttle() -> f64 {
    0.0001
}

fn default_server_recv_throttle() -> f64 {
    0.0001
}

fn default_writer_persist_throttle() -> f64 {
    0.5
}

impl Default for DatastreamConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            server_address: default_address(),
            client_address: default_address(),
            wire_format: WireFormat::default(),
            client_send_throttle: default_client_send_throttle(),
            server_recv_throttle: default_server_recv_throttle(),
            writer_persist_throttle: default_writer_persist_throttle(),
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::Config(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        ))
    })
}

impl DatastreamConfig {
    /// Configuration for a UDP transport where server and client share `address`
    pub fn inet(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            kind: TransportKind::Inet,
            server_address: address.clone(),
            client_address: address,
            ..Self::default()
        }
    }

    /// Configuration for a domain socket transport at `path`
    pub fn local(path: impl AsRef<Path>) -> Self {
        let address = path.as_ref().to_string_lossy().into_owned();
        Self {
            kind: TransportKind::Local,
            server_address: address.clone(),
            client_address: address,
            ..Self::default()
        }
    }

    /// Maximum encoded payload size per datagram
    pub fn datagram_budget(&self) -> usize {
        match self.kind {
            TransportKind::Local => LOCAL_BUDGET,
            TransportKind::Inet => INET_BUDGET,
        }
    }

    pub fn client_send_throttle(&self) -> Result<Duration> {
        seconds("client_send_throttle", self.client_send_throttle)
    }

    pub fn server_recv_throttle(&self) -> Result<Duration> {
        seconds("server_recv_throttle", self.server_recv_throttle)
    }

    pub fn writer_persist_throttle(&self) -> Result<Duration> {
        seconds("writer_persist_throttle", self.writer_persist_throttle)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding one file per experiment
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("trackstream-data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); `RUST_LOG` wins
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use trackstream::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("trackstream.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject throttles that cannot be turned into durations
    pub fn validate(&self) -> Result<()> {
        self.datastream.client_send_throttle()?;
        self.datastream.server_recv_throttle()?;
        self.datastream.writer_persist_throttle()?;
        Ok(())
    }
}
