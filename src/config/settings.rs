//! Configuration settings for a Lumo session.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::SessionError;

/// Main configuration structure for a session.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote peer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Host name or address of the peer.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port of the peer.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum time to wait for the connection to open, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Request lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
    /// Time a sent request may wait for its response, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
    /// Cadence of the timeout sweep, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame payload size in bytes, both directions.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Bytes requested from the socket per read event.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_max_message_size() -> usize {
    1_048_576 // 1MB
}

fn default_read_buffer_size() -> usize {
    8_192
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_request_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RequestsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Settings {
    /// Default settings pointed at the given peer.
    pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
        let mut settings = Self::default();
        settings.connection.host = host.into();
        settings.connection.port = port;
        settings
    }

    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SessionError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| SessionError::Config {
            message: format!("Failed to parse config file '{}': {}", path.display(), e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), SessionError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(SessionError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(SessionError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.connection.host.is_empty() {
            return Err(SessionError::Config {
                message: "Connection host must not be empty".to_string(),
            });
        }

        if self.connection.connect_timeout_ms == 0
            || self.requests.timeout_ms == 0
            || self.requests.sweep_interval_ms == 0
        {
            return Err(SessionError::Config {
                message: "Timeouts and sweep interval must be greater than zero".to_string(),
            });
        }

        if self.limits.read_buffer_size == 0 {
            return Err(SessionError::Config {
                message: "Read buffer size must be greater than zero".to_string(),
            });
        }

        // The length prefix is a u32
        if self.limits.max_message_size > u32::MAX as usize {
            return Err(SessionError::Config {
                message: format!(
                    "Invalid max message size {}. Must fit the 4-byte length prefix",
                    self.limits.max_message_size
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.requests.timeout(), Duration::from_secs(5));
        assert_eq!(settings.requests.sweep_interval(), Duration::from_secs(1));
        assert_eq!(settings.limits.max_message_size, 1_048_576);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[connection]\nhost = \"peer.local\"\nport = 7001\n\n[requests]\ntimeout_ms = 250"
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.connection.host, "peer.local");
        assert_eq!(settings.connection.port, 7001);
        assert_eq!(settings.requests.timeout_ms, 250);
        assert_eq!(settings.requests.sweep_interval_ms, 1_000);
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_load_rejects_invalid_log_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"xml\"").unwrap();

        let result = Settings::load(file.path());
        assert!(matches!(result, Err(SessionError::Config { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut settings = Settings::for_endpoint("localhost", 1234);
        settings.requests.timeout_ms = 0;
        assert!(settings.validate().is_err());
    }
}
