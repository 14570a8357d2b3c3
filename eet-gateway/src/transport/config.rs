//! Authority endpoint configuration.
//!
//! Deserialised from the `[authority]` table of the gateway configuration.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::ConfigError;

/// Playground (test) endpoint of the registry.
pub const PLAYGROUND_URL: &str = "https://pg.eet.cz/eet/services/EETServiceSOAP/v3";
/// Production endpoint of the registry.
pub const PRODUCTION_URL: &str = "https://prod.eet.cz/eet/services/EETServiceSOAP/v3";

/// Registry environment.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Test environment; responses carry `test="true"`.
    #[default]
    Playground,
    /// Live environment.
    Production,
}

impl Environment {
    /// The pinned endpoint for this environment.
    #[must_use]
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Playground => PLAYGROUND_URL,
            Self::Production => PRODUCTION_URL,
        }
    }
}

/// HTTP client settings for the registry.
///
/// # Examples
///
/// ```toml
/// [authority]
/// timeout_secs = 10
/// connect_timeout_secs = 5
/// http_version = "http1"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorityConfig {
    /// Overrides the environment's endpoint.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum idle connections kept to the registry.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// HTTP version preference.
    #[serde(default)]
    pub http_version: HttpVersion,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle(),
            http_version: HttpVersion::default(),
        }
    }
}

impl AuthorityConfig {
    /// Validates configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// - `timeout_secs`: must be 1-300 seconds
    /// - `connect_timeout_secs`: must be 1-60 seconds
    /// - `url`: must be an absolute HTTPS URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            return Err(ConfigError::Invalid("authority.timeout_secs must be between 1 and 300".to_owned()));
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > 60 {
            return Err(ConfigError::Invalid(
                "authority.connect_timeout_secs must be between 1 and 60".to_owned(),
            ));
        }
        if let Some(url) = &self.url {
            parse_endpoint(url)?;
        }
        Ok(())
    }

    /// Resolves the endpoint: the override when set, otherwise the environment's.
    pub fn endpoint(&self, environment: Environment) -> Result<Url, ConfigError> {
        parse_endpoint(self.url.as_deref().unwrap_or(environment.endpoint()))
    }

    /// Returns timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns connect timeout as Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("authority.url {raw:?}: {e}")))?;
    if url.scheme() != "https" {
        return Err(ConfigError::Invalid(format!("authority.url must use https: {raw}")));
    }
    Ok(url)
}

/// HTTP version preference.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersion {
    /// HTTP/1.1 only.
    Http1,
    /// Auto-negotiate via ALPN.
    #[default]
    Auto,
}

fn default_pool_max_idle() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}
