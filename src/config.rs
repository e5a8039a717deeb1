//! # Configuration Management
//!
//! Centralized configuration for the client and server facades.
//!
//! Nothing here is required: [`ClientInterface::new`](crate::service::client::ClientInterface::new)
//! and [`ServerInterface::new`](crate::service::server::ServerInterface::new) use the defaults.
//! Embedding applications that want to tune limits or timeouts build a
//! [`NetworkConfig`] and hand the relevant section to `with_config`.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed body size (16 MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// First id handed to an accepted connection; ids below are reserved
pub const FIRST_CONNECTION_ID: u32 = 10_000;

/// Default time a peer has to complete the handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for a TCP connect
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| NetError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| NetError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TETHER_SERVER_BIND_ADDRESS") {
            config.server.bind_address = addr.parse().map_err(|_| {
                NetError::ConfigError(format!("Invalid TETHER_SERVER_BIND_ADDRESS: '{addr}'"))
            })?;
        }

        if let Ok(id) = std::env::var("TETHER_FIRST_CONNECTION_ID") {
            if let Ok(val) = id.parse::<u32>() {
                config.server.first_connection_id = val;
            }
        }

        if let Ok(size) = std::env::var("TETHER_MAX_BODY_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.server.max_body_size = val;
                config.client.max_body_size = val;
            }
        }

        if let Ok(timeout) = std::env::var("TETHER_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.handshake_timeout = Duration::from_millis(val);
                config.client.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("TETHER_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the listener binds to; the port is given to `start`
    pub bind_address: IpAddr,

    /// Id assigned to the first accepted connection
    pub first_connection_id: u32,

    /// Largest message body accepted from a client
    pub max_body_size: usize,

    /// Time a client has to answer the handshake challenge
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Maximum number of connections kept in the pool
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            first_connection_id: FIRST_CONNECTION_ID,
            max_body_size: MAX_BODY_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.first_connection_id == 0 {
            errors.push("First connection id must be greater than 0".to_string());
        }

        if self.max_body_size == 0 {
            errors.push("Server max body size cannot be 0".to_string());
        } else if self.max_body_size > u32::MAX as usize {
            errors.push(format!(
                "Server max body size too large: {} bytes (maximum: {})",
                self.max_body_size,
                u32::MAX
            ));
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for each TCP connect attempt
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Time allowed for the server's challenge to arrive
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Largest message body accepted from the server
    pub max_body_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_body_size == 0 {
            errors.push("Client max body size cannot be 0".to_string());
        } else if self.max_body_size > u32::MAX as usize {
            errors.push(format!(
                "Client max body size too large: {} bytes (maximum: {})",
                self.max_body_size,
                u32::MAX
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("tether-net"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
