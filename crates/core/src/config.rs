//! Configuration loader for TubeMirror services
//!
//! Environment variables use the `TUBE_MIRROR_` prefix, with a `.env`
//! file loaded via dotenvy as the lowest-priority source. Override
//! hierarchy: defaults < .env < environment.
//!
//! # Example
//!
//! ```no_run
//! use tube_mirror_core::config::{ConfigLoader, DatabaseConfig, ServiceConfig, VideoApiConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tube_mirror_core::config::load_dotenv();
//!
//! let db = DatabaseConfig::from_env()?;
//! let service = ServiceConfig::from_env()?;
//! let api = VideoApiConfig::from_env()?;
//!
//! db.validate()?;
//! service.validate()?;
//! api.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::CoreError;
use std::time::Duration;
use url::Url;

/// Load a `.env` file if present. Missing files are not an error.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Configuration loader trait
///
/// Standardized loading and validation of configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, applying defaults
    /// for missing optional values.
    fn from_env() -> Result<Self, CoreError>;

    /// Validate configuration values (URL formats, port ranges,
    /// positive timeouts).
    fn validate(&self) -> Result<(), CoreError>;
}

fn parse_env_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| CoreError::config(format!("Cannot parse value of {}", key), key)),
        Err(_) => Ok(default),
    }
}

/// PostgreSQL connection configuration
///
/// # Environment Variables
///
/// - `TUBE_MIRROR_DATABASE_URL` (required, falls back to `DATABASE_URL`)
/// - `TUBE_MIRROR_DATABASE_MAX_CONNECTIONS` (optional, default: 20)
/// - `TUBE_MIRROR_DATABASE_MIN_CONNECTIONS` (optional, default: 2)
/// - `TUBE_MIRROR_DATABASE_CONNECT_TIMEOUT` (optional, seconds, default: 30)
/// - `TUBE_MIRROR_DATABASE_IDLE_TIMEOUT` (optional, seconds, default: 600)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/tube_mirror".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, CoreError> {
        let url = std::env::var("TUBE_MIRROR_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                CoreError::config(
                    "DATABASE_URL or TUBE_MIRROR_DATABASE_URL must be set",
                    "TUBE_MIRROR_DATABASE_URL",
                )
            })?;

        let defaults = DatabaseConfig::default();
        let max_connections = parse_env_var(
            "TUBE_MIRROR_DATABASE_MAX_CONNECTIONS",
            defaults.max_connections,
        )?;
        let min_connections = parse_env_var(
            "TUBE_MIRROR_DATABASE_MIN_CONNECTIONS",
            defaults.min_connections,
        )?;
        let connect_timeout_secs = parse_env_var("TUBE_MIRROR_DATABASE_CONNECT_TIMEOUT", 30u64)?;
        let idle_timeout_secs = parse_env_var("TUBE_MIRROR_DATABASE_IDLE_TIMEOUT", 600u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        Url::parse(&self.url).map_err(|e| {
            CoreError::config(
                format!("Invalid DATABASE_URL: {}", e),
                "TUBE_MIRROR_DATABASE_URL",
            )
        })?;

        if self.max_connections == 0 {
            return Err(CoreError::config(
                "max_connections must be greater than 0",
                "TUBE_MIRROR_DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(CoreError::config(
                format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                "TUBE_MIRROR_DATABASE_MIN_CONNECTIONS",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(CoreError::config(
                "connect_timeout must be greater than 0 seconds",
                "TUBE_MIRROR_DATABASE_CONNECT_TIMEOUT",
            ));
        }

        Ok(())
    }
}

/// HTTP service configuration
///
/// # Environment Variables
///
/// - `TUBE_MIRROR_SERVICE_HOST` (optional, default: "0.0.0.0")
/// - `TUBE_MIRROR_SERVICE_PORT` (optional, default: 8085)
/// - `TUBE_MIRROR_SERVICE_LOG_LEVEL` (optional, default: "info")
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            log_level: "info".to_string(),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, CoreError> {
        let defaults = ServiceConfig::default();
        Ok(Self {
            host: std::env::var("TUBE_MIRROR_SERVICE_HOST").unwrap_or(defaults.host),
            port: parse_env_var("TUBE_MIRROR_SERVICE_PORT", defaults.port)?,
            log_level: std::env::var("TUBE_MIRROR_SERVICE_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.host.is_empty() {
            return Err(CoreError::config(
                "host must not be empty",
                "TUBE_MIRROR_SERVICE_HOST",
            ));
        }
        if self.port == 0 {
            return Err(CoreError::config(
                "port must be greater than 0",
                "TUBE_MIRROR_SERVICE_PORT",
            ));
        }
        Ok(())
    }
}

/// External video API configuration
///
/// # Environment Variables
///
/// - `TUBE_MIRROR_VIDEO_API_KEY` (required): primary API credential
/// - `TUBE_MIRROR_VIDEO_API_FALLBACK_KEY` (optional): secondary credential,
///   selected when the primary quota budget is exhausted
/// - `TUBE_MIRROR_VIDEO_API_BASE_URL` (optional, default: YouTube Data API v3)
/// - `TUBE_MIRROR_ALTERNATE_INGEST_URL` (optional): independently deployed
///   ingest endpoint used as the second fallback strategy
/// - `TUBE_MIRROR_PRIMARY_INGEST_URL` (optional): public URL of this
///   service's own ingest endpoint, used by the last-resort raw strategy
#[derive(Debug, Clone)]
pub struct VideoApiConfig {
    pub api_key: String,
    pub fallback_api_key: Option<String>,
    pub base_url: String,
    pub alternate_ingest_url: Option<String>,
    pub primary_ingest_url: Option<String>,
}

impl ConfigLoader for VideoApiConfig {
    fn from_env() -> Result<Self, CoreError> {
        let api_key = std::env::var("TUBE_MIRROR_VIDEO_API_KEY").map_err(|_| {
            CoreError::config(
                "TUBE_MIRROR_VIDEO_API_KEY must be set",
                "TUBE_MIRROR_VIDEO_API_KEY",
            )
        })?;

        Ok(Self {
            api_key,
            fallback_api_key: std::env::var("TUBE_MIRROR_VIDEO_API_FALLBACK_KEY").ok(),
            base_url: std::env::var("TUBE_MIRROR_VIDEO_API_BASE_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/youtube/v3".to_string()),
            alternate_ingest_url: std::env::var("TUBE_MIRROR_ALTERNATE_INGEST_URL").ok(),
            primary_ingest_url: std::env::var("TUBE_MIRROR_PRIMARY_INGEST_URL").ok(),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.api_key.is_empty() {
            return Err(CoreError::config(
                "api_key must not be empty",
                "TUBE_MIRROR_VIDEO_API_KEY",
            ));
        }

        Url::parse(&self.base_url).map_err(|e| {
            CoreError::config(
                format!("Invalid video API base URL: {}", e),
                "TUBE_MIRROR_VIDEO_API_BASE_URL",
            )
        })?;

        for (url, key) in [
            (&self.alternate_ingest_url, "TUBE_MIRROR_ALTERNATE_INGEST_URL"),
            (&self.primary_ingest_url, "TUBE_MIRROR_PRIMARY_INGEST_URL"),
        ] {
            if let Some(u) = url {
                Url::parse(u).map_err(|e| {
                    CoreError::config(format!("Invalid ingest URL: {}", e), key)
                })?;
            }
        }

        Ok(())
    }
}
