//! # Configuration Management
//!
//! Centralized configuration for the protocol core and its reference transports.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Notes
//! - `delegate_handshake` forwards the handshake itself to the resource layer
//! - `sub_request_timeout` bounds each dispatched sub-request; the aggregator has no
//!   timeout of its own, so this is what keeps a batch from staying open forever

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version announced by the reference client
pub const PROTOCOL_VERSION: &str = "1.0";

/// Protocol name announced by the reference client
pub const PROTOCOL_NAME: &str = "SwaggerSocket";

/// Max allowed inbound message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default time a dispatched sub-request may take before it is answered with 504
pub const DEFAULT_SUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a long-poll receive stays parked
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle lifetime of a registered session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Server-side protocol configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
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
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SWAGGERSOCKET_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(delegate) = std::env::var("SWAGGERSOCKET_DELEGATE_HANDSHAKE") {
            config.server.delegate_handshake = delegate.parse::<bool>().map_err(|_| {
                ProtocolError::ConfigError(format!(
                    "SWAGGERSOCKET_DELEGATE_HANDSHAKE must be true or false, got '{delegate}'"
                ))
            })?;
        }

        if let Ok(base) = std::env::var("SWAGGERSOCKET_BASE_PATH") {
            config.server.base_path = base;
        }

        if let Ok(timeout) = std::env::var("SWAGGERSOCKET_SUB_REQUEST_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.sub_request_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("SWAGGERSOCKET_LONG_POLL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.long_poll_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("SWAGGERSOCKET_MAX_SESSIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_sessions = val;
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

/// Server-side protocol configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the reference stream server (e.g., "127.0.0.1:8080")
    pub address: String,

    /// Feed the handshake through normal dispatch after answering it
    pub delegate_handshake: bool,

    /// Path prefix joined in front of every sub-request path
    pub base_path: String,

    /// Upper bound for a single dispatched sub-request
    #[serde(with = "duration_serde")]
    pub sub_request_timeout: Duration,

    /// How long a long-poll receive stays parked before giving up
    #[serde(with = "duration_serde")]
    pub long_poll_timeout: Duration,

    /// Maximum number of live sessions in the registry
    pub max_sessions: usize,

    /// Idle lifetime of a registered session
    #[serde(with = "duration_serde")]
    pub session_ttl: Duration,

    /// Inbound messages larger than this are dropped as malformed
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8080"),
            delegate_handshake: false,
            base_path: String::new(),
            sub_request_timeout: DEFAULT_SUB_REQUEST_TIMEOUT,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            max_sessions: 10_000,
            session_ttl: DEFAULT_SESSION_TTL,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        if !self.base_path.is_empty() && !self.base_path.starts_with('/') {
            errors.push(format!(
                "Base path must start with '/': '{}'",
                self.base_path
            ));
        }

        if self.sub_request_timeout.as_millis() < 10 {
            errors.push("Sub-request timeout too short (minimum: 10ms)".to_string());
        } else if self.sub_request_timeout.as_secs() > 3600 {
            errors.push("Sub-request timeout too long (maximum: 1 hour)".to_string());
        }

        if self.long_poll_timeout.as_millis() < 100 {
            errors.push("Long-poll timeout too short (minimum: 100ms)".to_string());
        } else if self.long_poll_timeout.as_secs() > 300 {
            errors.push("Long-poll timeout too long (maximum: 300s)".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 1_000_000 {
            errors.push(format!(
                "Max sessions very high: {} (ensure system resources can support this)",
                self.max_sessions
            ));
        }

        if self.session_ttl.as_secs() < 1 {
            errors.push("Session TTL too short (minimum: 1s)".to_string());
        }

        if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_message_size
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

    /// Whether `RUST_LOG` may override `log_level`
    pub env_filter: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("swaggersocket"),
            log_level: Level::INFO,
            json_format: false,
            env_filter: true,
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

/// Durations travel as integer milliseconds
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
