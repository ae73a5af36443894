//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Dispatch mode (pull scrape server or push loop)
//! - Push destination, cadence and API key
//! - Discovery port sets and eviction budget
//! - Per-descriptor label filters
//!
//! Credentials are never part of the file; they come from the environment
//! (`PG_USERNAME`, `PG_PASSWORD`, `PGB_USERNAME`, `PGB_PASSWORD`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::metrics::filters::FilterRule;

/// Default pull listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9890";

/// Default push cadence (60 seconds).
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(60);

/// Default background discovery cadence (60 seconds).
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Default per-operation connect/query timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default consecutive re-probe failures before a service is evicted.
pub const DEFAULT_EVICTION_THRESHOLD: u32 = 3;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Selected dispatch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Serve a scrape endpoint.
    Pull,
    /// Push to a remote aggregator on a fixed cadence.
    Push,
}

/// Connection secrets, one pair per endpoint family.
#[derive(Clone, Default)]
pub struct Credentials {
    pub postgres_user: String,
    pub postgres_password: String,
    pub pgbouncer_user: String,
    pub pgbouncer_password: String,
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Self {
        let var = |name: &str, fallback: &str| {
            std::env::var(name).unwrap_or_else(|_| fallback.to_string())
        };
        Self {
            postgres_user: var("PG_USERNAME", "postgres"),
            postgres_password: var("PG_PASSWORD", ""),
            pgbouncer_user: var("PGB_USERNAME", "pgbouncer"),
            pgbouncer_password: var("PGB_PASSWORD", ""),
        }
    }
}

// Secrets must never reach logs, even through a stray {:?}.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("postgres_user", &self.postgres_user)
            .field("postgres_password", &"<redacted>")
            .field("pgbouncer_user", &self.pgbouncer_user)
            .field("pgbouncer_password", &"<redacted>")
            .finish()
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Candidate Postgres ports.
    pub postgres_ports: Vec<u16>,

    /// Candidate PgBouncer ports.
    pub pgbouncer_ports: Vec<u16>,

    /// Background rediscovery cadence (default: 60s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Consecutive failed re-probes before eviction (default: 3).
    pub eviction_threshold: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            postgres_ports: vec![5432],
            pgbouncer_ports: vec![6432],
            interval: DEFAULT_DISCOVERY_INTERVAL,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Dispatch mode (default: pull).
    pub mode: RuntimeMode,

    /// Pull listen address (default: "0.0.0.0:9890").
    pub listen: String,

    /// Push destination base URL; required in push mode.
    pub metric_service_url: Option<String>,

    /// Push cadence (default: 60s).
    #[serde(with = "humantime_serde")]
    pub send_interval: Duration,

    /// API key attached to push requests.
    pub api_key: Option<String>,

    /// Optional project label attached to every metric.
    pub project_id: Option<String>,

    /// Per-operation connect/query timeout (default: 5s).
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Discovery settings.
    pub discovery: DiscoveryConfig,

    /// Label filter rules keyed by descriptor name.
    pub filters: HashMap<String, Vec<FilterRule>>,

    /// Endpoint secrets; environment-only, never part of the file.
    #[serde(skip)]
    pub credentials: Credentials,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Pull,
            listen: DEFAULT_LISTEN.to_string(),
            metric_service_url: None,
            send_interval: DEFAULT_SEND_INTERVAL,
            api_key: None,
            project_id: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery: DiscoveryConfig::default(),
            filters: HashMap::new(),
            credentials: Credentials::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file and pick up env credentials.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed. Call
    /// [`AppConfig::validate`] once CLI overrides have been applied.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.credentials = Credentials::from_env();
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!("invalid listen address: '{}'", self.listen))
        })?;

        if self.send_interval.is_zero() {
            return Err(ConfigError::Validation(
                "send_interval must be positive".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "connect_timeout must be positive".to_string(),
            ));
        }

        if self.mode == RuntimeMode::Push {
            match &self.metric_service_url {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(ConfigError::Validation(format!(
                        "metric_service_url must be an http(s) URL: '{url}'"
                    )));
                }
                None => {
                    return Err(ConfigError::Validation(
                        "push mode requires metric_service_url".to_string(),
                    ));
                }
            }
        }

        if self.discovery.eviction_threshold == 0 {
            return Err(ConfigError::Validation(
                "discovery eviction_threshold must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, RuntimeMode::Pull);
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.send_interval, Duration::from_secs(60));
        assert_eq!(config.discovery.postgres_ports, vec![5432]);
        assert_eq!(config.discovery.pgbouncer_ports, vec![6432]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
mode: push
metric_service_url: https://metrics.example.com
send_interval: 30s
discovery:
  postgres_ports: [5432, 5433]
  interval: 2m
filters:
  node_filesystem:
    - label: mountpoint
      exclude: "^/(proc|sys)"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mode, RuntimeMode::Push);
        assert_eq!(config.send_interval, Duration::from_secs(30));
        assert_eq!(config.discovery.postgres_ports, vec![5432, 5433]);
        assert_eq!(config.discovery.interval, Duration::from_secs(120));
        assert_eq!(config.filters["node_filesystem"].len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_push_mode_requires_url() {
        let config = AppConfig {
            mode: RuntimeMode::Push,
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metric_service_url"));
    }

    #[test]
    fn test_push_mode_rejects_non_http_url() {
        let config = AppConfig {
            mode: RuntimeMode::Push,
            metric_service_url: Some("ftp://example.com".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_listen_address() {
        let config = AppConfig {
            listen: "not-an-address".to_string(),
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("listen address"));
    }

    #[test]
    fn test_credentials_debug_redacts_passwords() {
        let creds = Credentials {
            postgres_user: "monitor".to_string(),
            postgres_password: "hunter2".to_string(),
            pgbouncer_user: "pgbouncer".to_string(),
            pgbouncer_password: "hunter3".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
        assert!(rendered.contains("monitor"));
    }
}
