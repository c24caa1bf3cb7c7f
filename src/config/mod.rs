//! Configuration management for freightline
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Every section has defaults suitable for a local stack.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::audit::AuditConfig;
use crate::cache::CacheConfig;
use crate::coordinator::ServerConfig;
use crate::events::EventsConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Record store configuration
    pub database: DatabaseConfig,

    /// Load listing cache configuration
    pub cache: CacheConfig,

    /// Event stream configuration
    pub events: EventsConfig,

    /// Audit trail configuration
    pub audit: AuditConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// PostgreSQL record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Maximum pool size
    pub pool_size: usize,

    /// Connect and pool checkout timeout in seconds
    pub connect_timeout_secs: u64,

    /// Per-statement timeout in seconds
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::from("postgresql://localhost/freightline"),
            pool_size: 10,
            connect_timeout_secs: 10,
            statement_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    /// Load database settings from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("POSTGRES_URL"))
                .unwrap_or(defaults.url),
            pool_size: env_parse("DB_POOL_SIZE").unwrap_or(defaults.pool_size),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT")
                .unwrap_or(defaults.connect_timeout_secs),
            statement_timeout_secs: env_parse("DB_STATEMENT_TIMEOUT")
                .unwrap_or(defaults.statement_timeout_secs),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// Parse an environment variable, ignoring unset or malformed values
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig::from_env().context("Invalid server settings")?;

        Ok(Self {
            server,
            database: DatabaseConfig::from_env(),
            cache: CacheConfig::from_env()?,
            events: EventsConfig::from_env(),
            audit: AuditConfig::from_env(),
            logging: LoggingConfig {
                level: std::env::var("FREIGHTLINE_LOG_LEVEL")
                    .unwrap_or_else(|_| String::from("info")),
                format: std::env::var("FREIGHTLINE_LOG_FORMAT")
                    .unwrap_or_else(|_| String::from("text")),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server
            .validate()
            .map_err(|e| anyhow::anyhow!("server: {e}"))?;

        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be greater than 0");
        }

        if self.database.statement_timeout_secs == 0 {
            anyhow::bail!("database.statement_timeout_secs must be greater than 0");
        }

        if self.cache.pool_size == 0 {
            anyhow::bail!("cache.pool_size must be greater than 0");
        }

        if self.cache.loads_ttl_secs == 0 {
            anyhow::bail!("cache.loads_ttl_secs must be greater than 0");
        }

        if self.events.assignment_topic.trim().is_empty() {
            anyhow::bail!("events.assignment_topic must not be empty");
        }

        if self.events.worker_group.trim().is_empty() {
            anyhow::bail!("events.worker_group must not be empty");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Statement timeout as Duration
    #[must_use]
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.database.statement_timeout_secs)
    }
}
