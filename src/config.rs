//! # Configuration Management
//!
//! Centralized configuration for the connection-mux core.
//!
//! This module provides structured configuration for the multiplexing
//! server: listener ports, the admin port, the HTTP relay upstream,
//! codec mode, ban policy, and logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Validation
//! `validate()` returns a list of human-readable problems; the admin port
//! must be distinct from every binary listener port, and at least one
//! binary listener port must be configured.

use crate::core::ban::BanPolicy;
use crate::core::codec::CodecMode;
use crate::error::{MuxError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Length of the frame header: 1 byte type + 4 bytes big-endian payload length
pub const FRAME_HEADER_LEN: usize = 5;

/// Max allowed payload size (16 MB) before a frame is rejected outright
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Size of the per-connection read buffer
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MuxConfig {
    /// Listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// HTTP relay configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Codec configuration
    #[serde(default)]
    pub codec: CodecConfig,

    /// Ban enforcement configuration
    #[serde(default)]
    pub ban: BanConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MuxConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| MuxError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| MuxError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| MuxError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(host) = std::env::var("CONN_MUX_HOST") {
            config.listener.host = host;
        }

        if let Ok(ports) = std::env::var("CONN_MUX_PORTS") {
            let parsed: Vec<u16> = ports
                .split(',')
                .filter_map(|p| p.trim().parse::<u16>().ok())
                .collect();
            if !parsed.is_empty() {
                config.listener.ports = parsed;
            }
        }

        if let Ok(admin) = std::env::var("CONN_MUX_ADMIN_PORT") {
            if let Ok(val) = admin.parse::<u16>() {
                config.listener.admin_port = val;
            }
        }

        if let Ok(upstream) = std::env::var("CONN_MUX_UPSTREAM_ADDRESS") {
            config.relay.upstream_address = upstream;
        }

        if let Ok(timeout) = std::env::var("CONN_MUX_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.listener.shutdown_timeout = Duration::from_millis(val);
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

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.listener.validate());
        errors.extend(self.relay.validate());
        errors.extend(self.codec.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MuxError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Bind address shared by every listener (e.g., "127.0.0.1")
    pub host: String,

    /// Binary-protocol listener ports
    pub ports: Vec<u16>,

    /// Admin command listener port; must differ from every binary port
    pub admin_port: u16,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            ports: vec![3001],
            admin_port: 3003,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ListenerConfig {
    /// Validate listener configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Listener host cannot be empty".to_string());
        }

        if self.ports.is_empty() {
            errors.push("At least one binary listener port must be configured".to_string());
        }

        // Port 0 binds an ephemeral port and cannot collide
        if self.admin_port != 0 && self.ports.contains(&self.admin_port) {
            errors.push(format!(
                "Admin port {} collides with a binary listener port",
                self.admin_port
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// HTTP relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Address of the internal HTTP handler (e.g., "127.0.0.1:3002")
    pub upstream_address: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_address: String::from("127.0.0.1:3002"),
        }
    }
}

impl RelayConfig {
    /// Validate relay configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.upstream_address.is_empty() {
            errors.push("Relay upstream address cannot be empty".to_string());
        } else if !self.upstream_address.contains(':') {
            errors.push(format!(
                "Invalid relay upstream address: '{}' (expected format: 'host:port')",
                self.upstream_address
            ));
        }

        errors
    }
}

/// Codec configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Frame decoding mode: streaming reassembly or one-chunk-per-frame
    pub mode: CodecMode,

    /// Maximum accepted payload size in bytes
    pub max_payload_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mode: CodecMode::Streaming,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.max_payload_size > u32::MAX as usize {
            errors.push(format!(
                "Max payload size does not fit the 32-bit length field: {}",
                self.max_payload_size
            ));
        }

        errors
    }
}

/// Ban enforcement configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BanConfig {
    /// What to do when the ban store is unreachable at accept time
    pub policy: BanPolicy,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            policy: BanPolicy::FailOpen,
        }
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
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("conn-mux"),
            log_level: Level::INFO,
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
