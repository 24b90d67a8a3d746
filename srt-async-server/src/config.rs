//! Configuration for the server and caller owners

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default future deadline applied when per-call timeouts are enabled
/// without an explicit value.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 3000;

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener port. Required, must be non-zero.
    pub port: u16,
    /// Local interface to bind.
    #[serde(default = "default_address")]
    pub address: String,
    /// Delay between epoll polls. 0 re-polls as soon as possible.
    #[serde(default)]
    pub polling_period_ms: u64,
    /// Native timeout handed to each `epoll_uwait`.
    #[serde(default)]
    pub uwait_timeout_ms: i64,
    /// Backlog passed to `listen`.
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Future deadline for every facade call. Disabled when absent.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// 0-7 log level forwarded to the native library on open.
    #[serde(default)]
    pub log_level: Option<i32>,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    65535
}

impl ServerConfig {
    /// Configuration with defaults for everything but the port.
    pub fn new(port: u16) -> Self {
        ServerConfig {
            port,
            address: default_address(),
            polling_period_ms: 0,
            uwait_timeout_ms: 0,
            backlog: default_backlog(),
            call_timeout_ms: None,
            log_level: None,
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if let Some(level) = self.log_level {
            if !(0..=7).contains(&level) {
                return Err(ConfigError::Invalid(format!(
                    "log level {level} is outside 0-7"
                )));
            }
        }
        Ok(())
    }

    pub fn polling_period(&self) -> Duration {
        Duration::from_millis(self.polling_period_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Connect-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerConfig {
    /// Remote host.
    pub host: String,
    /// Remote port. Must be non-zero.
    pub port: u16,
    /// Future deadline for every facade call. Disabled when absent.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl CallerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        CallerConfig {
            host: host.into(),
            port,
            call_timeout_ms: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new(9000);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.polling_period_ms, 0);
        assert_eq!(config.uwait_timeout_ms, 0);
        assert_eq!(config.backlog, 65535);
        assert_eq!(config.call_timeout_ms, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_port_rejected() {
        let config = ServerConfig::new(0);
        assert!(config.validate().is_err());

        let caller = CallerConfig::new("127.0.0.1", 0);
        assert!(caller.validate().is_err());
    }

    #[test]
    fn test_log_level_range() {
        let mut config = ServerConfig::new(9000);
        config.log_level = Some(7);
        config.validate().unwrap();

        config.log_level = Some(8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            port = 9000
            polling_period_ms = 5
            call_timeout_ms = 3000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.polling_period_ms, 5);
        assert_eq!(parsed.call_timeout(), Some(Duration::from_millis(3000)));
        assert_eq!(parsed.backlog, 65535);
        assert_eq!(parsed.address, "0.0.0.0");
    }
}
