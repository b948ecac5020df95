//! # Configuration Management
//!
//! Centralized configuration for servers and client sessions.
//!
//! This module provides structured configuration for the listening server, for
//! outgoing client sessions, and for logging. Every per-connection knob
//! (queue size, keepalive interval, timeouts) lives here.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`UNIPORT_*`)
//! - Direct instantiation with defaults
//!
//! Durations are written as milliseconds in TOML.
//!
//! ```rust
//! use uniport::config::NetworkConfig;
//!
//! let config = NetworkConfig::from_toml(r#"
//!     [server]
//!     name = "lobby"
//!     tcp_port = 7000
//!     packet_limit = 128
//!     ping_delay = 500
//! "#).unwrap();
//! assert_eq!(config.server.name, "lobby");
//! assert_eq!(config.server.tcp_port, Some(7000));
//! assert_eq!(config.server.ping_delay.as_millis(), 500);
//! assert!(config.validate().is_empty());
//! ```

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default TCP port for servers
pub const DEFAULT_TCP_PORT: u16 = 7070;

/// Default UDP port for servers
pub const DEFAULT_UDP_PORT: u16 = 7071;

/// Default outgoing queue length per connection
pub const DEFAULT_PACKET_LIMIT: usize = 64;

/// Main network configuration structure that contains all configurable settings
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
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    ///
    /// Port variables accept `off` to disable the listener.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("UNIPORT_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(port) = std::env::var("UNIPORT_TCP_PORT") {
            config.server.tcp_port = parse_port("UNIPORT_TCP_PORT", &port)?;
        }

        if let Ok(port) = std::env::var("UNIPORT_UDP_PORT") {
            config.server.udp_port = parse_port("UNIPORT_UDP_PORT", &port)?;
        }

        if let Ok(name) = std::env::var("UNIPORT_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(motd) = std::env::var("UNIPORT_MOTD") {
            config.server.motd = motd;
        }

        if let Ok(limit) = std::env::var("UNIPORT_PACKET_LIMIT") {
            if let Ok(val) = limit.parse::<usize>() {
                config.server.packet_limit = val;
                config.client.packet_limit = val;
            }
        }

        if let Ok(timeout) = std::env::var("UNIPORT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.timeout = Duration::from_millis(val);
                config.client.connection_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(ping) = std::env::var("UNIPORT_PING_DELAY_MS") {
            if let Ok(val) = ping.parse::<u64>() {
                config.server.ping_delay = Duration::from_millis(val);
                config.client.ping_delay = Duration::from_millis(val);
            }
        }

        if let Ok(addr) = std::env::var("UNIPORT_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(name) = std::env::var("UNIPORT_CLIENT_NAME") {
            config.client.name = name;
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

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
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
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_port(var: &str, value: &str) -> Result<Option<u16>> {
    if value.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|_| ProtocolError::ConfigError(format!("{var} must be 0-65535 or 'off', got '{value}'")))
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind listeners on (e.g., "0.0.0.0")
    pub bind_address: String,

    /// TCP listen port; `None` disables the listener
    pub tcp_port: Option<u16>,

    /// UDP listen port; `None` disables the listener
    pub udp_port: Option<u16>,

    /// Name sent to clients during the handshake
    pub name: String,

    /// Message of the day sent to clients during the handshake
    pub motd: String,

    /// Timeout for the protocol magic and the handshake
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Idle time after which a keepalive ping is queued
    #[serde(with = "duration_serde")]
    pub ping_delay: Duration,

    /// Maximum number of packets in each connection's outgoing queue
    pub packet_limit: usize,

    /// Whether rejected handshakes are logged
    pub log_rejections: bool,

    /// Close the TCP listener when the UDP listener cannot be bound
    pub close_tcp_if_udp_fails: bool,

    /// Maximum number of registered clients
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            tcp_port: Some(DEFAULT_TCP_PORT),
            udp_port: Some(DEFAULT_UDP_PORT),
            name: String::from("uniport"),
            motd: String::new(),
            timeout: timeout::DEFAULT_TIMEOUT,
            ping_delay: timeout::KEEPALIVE_INTERVAL,
            packet_limit: DEFAULT_PACKET_LIMIT,
            log_rejections: true,
            close_tcp_if_udp_fails: true,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.tcp_port.is_none() && self.udp_port.is_some() {
            errors.push("UDP requires a TCP listener to authenticate sessions".to_string());
        }

        if let (Some(tcp), Some(udp)) = (self.tcp_port, self.udp_port) {
            if tcp != 0 && tcp == udp {
                // Different protocols, so this is legal; flag it anyway since it is usually a typo
                errors.push(format!("WARNING: TCP and UDP share port {tcp}"));
            }
        }

        if self.name.len() > u16::MAX as usize {
            errors.push("Server name too long for the handshake".to_string());
        }

        if self.motd.len() > u16::MAX as usize {
            errors.push("MOTD too long for the handshake".to_string());
        }

        if self.timeout.as_millis() < 100 {
            errors.push("Timeout too short (minimum: 100ms)".to_string());
        } else if self.timeout.as_secs() > 300 {
            errors.push("Timeout too long (maximum: 300s)".to_string());
        }

        if self.ping_delay.as_millis() < 10 {
            errors.push("Ping delay too short (minimum: 10ms)".to_string());
        } else if self.ping_delay.as_secs() > 3600 {
            errors.push("Ping delay too long (maximum: 1 hour)".to_string());
        }

        if self.packet_limit == 0 {
            errors.push("Packet limit must be greater than 0".to_string());
        } else if self.packet_limit > 1_000_000 {
            errors.push(format!(
                "Packet limit too large: {} (max recommended: 1,000,000)",
                self.packet_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Server UDP port used by `UdpSender`
    pub udp_port: Option<u16>,

    /// Name announced in the handshake
    pub name: String,

    /// Identifier announced in the handshake
    pub uuid: String,

    /// Timeout for connecting and for the handshake
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Idle time after which a keepalive ping is queued
    #[serde(with = "duration_serde")]
    pub ping_delay: Duration,

    /// Maximum number of packets in the outgoing queue
    pub packet_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_TCP_PORT}"),
            udp_port: Some(DEFAULT_UDP_PORT),
            name: String::from("player"),
            uuid: String::new(),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            ping_delay: timeout::KEEPALIVE_INTERVAL,
            packet_limit: DEFAULT_PACKET_LIMIT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '127.0.0.1:7070')",
                self.address
            ));
        }

        if self.name.len() > u16::MAX as usize || self.uuid.len() > u16::MAX as usize {
            errors.push("Client name/uuid too long for the handshake".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.ping_delay.as_millis() < 10 {
            errors.push("Ping delay too short (minimum: 10ms)".to_string());
        }

        if self.packet_limit == 0 {
            errors.push("Packet limit must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("uniport"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
