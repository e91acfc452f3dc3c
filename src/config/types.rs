//! Core configuration types and loading.

use super::defaults::*;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    /// Outbound mail server. Without it notifications are only logged.
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Process identity and the operational HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// One of development, staging, production.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Port for `/metrics` and `/healthcheck`. 0 disables the endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Token lifetimes and housekeeping.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_activation_ttl_hours")]
    pub activation_ttl_hours: i64,
    #[serde(default = "default_authentication_ttl_hours")]
    pub authentication_ttl_hours: i64,
    /// How often expired tokens are deleted. 0 disables pruning.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl TokenConfig {
    pub fn activation_ttl(&self) -> chrono::TimeDelta {
        hours_saturating(self.activation_ttl_hours)
    }

    pub fn authentication_ttl(&self) -> chrono::TimeDelta {
        hours_saturating(self.authentication_ttl_hours)
    }
}

/// Out-of-range values clamp; token issue rejects an expiry past the clock.
fn hours_saturating(hours: i64) -> chrono::TimeDelta {
    chrono::TimeDelta::try_hours(hours).unwrap_or(if hours < 0 {
        chrono::TimeDelta::MIN
    } else {
        chrono::TimeDelta::MAX
    })
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            activation_ttl_hours: default_activation_ttl_hours(),
            authentication_ttl_hours: default_authentication_ttl_hours(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Outbound SMTP relay.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `From` header, e.g. `Greenlight <no-reply@greenlight.example>`.
    pub sender: String,
    /// Implicit TLS (SMTPS). Otherwise STARTTLS is used when the relay offers it.
    #[serde(default)]
    pub tls: bool,
    /// Bound on one delivery attempt, connect to QUIT.
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("sender", &self.sender)
            .field("tls", &self.tls)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Retry budget for notification delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_delivery_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Sender used when no `[smtp]` block is configured.
    #[serde(default)]
    pub fallback_sender: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            attempts: default_delivery_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            fallback_sender: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for detached work at shutdown.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}
