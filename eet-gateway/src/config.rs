//! Gateway configuration.
//!
//! Read once at startup from a TOML file; nothing is reloaded at runtime.
//!
//! # Examples
//!
//! ```
//! use eet_gateway::config::{GatewayConfig, VaultBackend};
//! use eet_gateway::transport::Environment;
//!
//! let toml = r#"
//!     environment = "production"
//!
//!     [vault]
//!     backend = "memory"
//!
//!     [trust]
//!     production_roots = ["/etc/eet/production-roots.pem"]
//!     authority_roots = ["/etc/eet/authority-roots.pem"]
//! "#;
//!
//! let config = GatewayConfig::from_toml(toml).unwrap();
//! assert_eq!(config.environment, Environment::Production);
//! assert_eq!(config.vault.backend, VaultBackend::Memory);
//! assert_eq!(config.authority.timeout_secs, 10);
//! ```

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{
    certs::{CertError, PinnedRoots},
    reliability::RetryPolicy,
    transport::{AuthorityConfig, Environment},
};

/// Organisation name in the authority's response-signing certificate.
pub const DEFAULT_AUTHORITY_ORGANIZATION: &str = "Česká republika - Generální finanční ředitelství";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Registry environment.
    #[serde(default)]
    pub environment: Environment,

    /// Registry client settings.
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Pinned certificates.
    #[serde(default)]
    pub trust: TrustConfig,

    /// REST listener.
    #[serde(default)]
    pub server: ServerConfig,
}

impl GatewayConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml(&text)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.authority.validate()?;
        self.vault.validate()?;
        self.trust.validate(self.environment)
    }

    /// Loads the merchant roots pinned for the configured environment.
    pub fn merchant_pool(&self) -> Result<PinnedRoots, CertError> {
        self.trust.merchant_pool(self.environment)
    }

    /// The registry URL to send sales to.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        self.authority.endpoint(self.environment)
    }
}

/// Vault backing store kind.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VaultBackend {
    /// Redis server at [`VaultConfig::url`].
    #[default]
    Redis,
    /// In-process map; contents are lost on restart.
    Memory,
}

/// `[vault]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Backing store kind.
    #[serde(default)]
    pub backend: VaultBackend,

    /// Redis URL (`redis://` or `rediss://`).
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Bound for optimistic transaction retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Prefix for every record key. Empty keys records by their bare
    /// identifier; set it when the database is shared with other data.
    #[serde(default)]
    pub namespace: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend: VaultBackend::default(),
            url: default_redis_url(),
            max_attempts: default_max_attempts(),
            namespace: String::new(),
        }
    }
}

impl VaultConfig {
    /// Validates the section.
    ///
    /// # Errors
    ///
    /// - `max_attempts`: must be 1-100
    /// - `url`: must be a `redis://` or `rediss://` URL when the backend is Redis
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_attempts) {
            return Err(ConfigError::Invalid("vault.max_attempts must be between 1 and 100".to_owned()));
        }
        if self.backend == VaultBackend::Redis {
            let url = Url::parse(&self.url).map_err(|e| ConfigError::Invalid(format!("vault.url: {e}")))?;
            if !matches!(url.scheme(), "redis" | "rediss") {
                return Err(ConfigError::Invalid(format!("vault.url must be redis:// or rediss://, got {}", url.scheme())));
            }
        }
        Ok(())
    }

    /// Retry policy for the vault's optimistic loops.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_attempts)
    }
}

/// `[trust]` section: PEM files with pinned certificates.
///
/// Merchant roots are kept per environment, each set holding the registry's
/// root generations for that environment. Only the set of the configured
/// environment is loaded.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// Roots issuing merchant certificates for the playground.
    #[serde(default)]
    pub playground_roots: Vec<PathBuf>,

    /// Roots issuing merchant certificates for production.
    #[serde(default)]
    pub production_roots: Vec<PathBuf>,

    /// Roots of the authority's response-signing certificate.
    #[serde(default)]
    pub authority_roots: Vec<PathBuf>,

    /// Required organisation of the response-signing certificate.
    #[serde(default = "default_authority_organization")]
    pub authority_organization: String,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            playground_roots: Vec::new(),
            production_roots: Vec::new(),
            authority_roots: Vec::new(),
            authority_organization: default_authority_organization(),
        }
    }
}

impl TrustConfig {
    /// Validates the section for `environment`.
    ///
    /// The other environment's merchant roots may be left empty.
    pub fn validate(&self, environment: Environment) -> Result<(), ConfigError> {
        if self.merchant_roots(environment).is_empty() {
            return Err(ConfigError::Invalid(format!(
                "trust.{} must name at least one PEM file",
                merchant_roots_key(environment)
            )));
        }
        if self.authority_roots.is_empty() {
            return Err(ConfigError::Invalid("trust.authority_roots must name at least one PEM file".to_owned()));
        }
        if self.authority_organization.trim().is_empty() {
            return Err(ConfigError::Invalid("trust.authority_organization must not be empty".to_owned()));
        }
        Ok(())
    }

    /// PEM files of the merchant roots pinned for `environment`.
    #[must_use]
    pub fn merchant_roots(&self, environment: Environment) -> &[PathBuf] {
        match environment {
            Environment::Playground => &self.playground_roots,
            Environment::Production => &self.production_roots,
        }
    }

    /// Loads the merchant root pool of `environment`.
    pub fn merchant_pool(&self, environment: Environment) -> Result<PinnedRoots, CertError> {
        PinnedRoots::from_pem_files(self.merchant_roots(environment))
    }

    /// Loads the authority root pool.
    pub fn authority_pool(&self) -> Result<PinnedRoots, CertError> {
        PinnedRoots::from_pem_files(&self.authority_roots)
    }
}

const fn merchant_roots_key(environment: Environment) -> &'static str {
    match environment {
        Environment::Playground => "playground_roots",
        Environment::Production => "production_roots",
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the REST API binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_owned()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_authority_organization() -> String {
    DEFAULT_AUTHORITY_ORGANIZATION.to_owned()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}
