//! Connection to the registry authority.
//!
//! [`AuthorityTransport`] is the seam between the gateway core and the
//! network: [`HttpTransport`] talks HTTPS to the registry, tests substitute an
//! in-process authority.
//!
//! # Examples
//!
//! ```rust,no_run
//! use eet_gateway::transport::{AuthorityConfig, AuthorityTransport, Environment, HttpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthorityConfig::default();
//! let transport = HttpTransport::with_config(config.endpoint(Environment::Playground)?, &config)?;
//!
//! transport.ping().await?;
//! # Ok(())
//! # }
//! ```

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use thiserror::Error;

pub mod config;
pub mod http;

pub use config::{AuthorityConfig, Environment, HttpVersion, PLAYGROUND_URL, PRODUCTION_URL};
pub use http::HttpTransport;

/// Errors talking to the registry.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS, timeout or protocol failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with an unexpected status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The endpoint URL is not acceptable.
    #[error("invalid endpoint: {0}")]
    InvalidUrl(String),

    /// The response body exceeded the accepted size.
    #[error("response body exceeds {limit} bytes")]
    TooLarge {
        /// Accepted size in bytes.
        limit: usize,
    },
}

impl TransportError {
    /// Whether the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }
}

/// Sends signed envelopes to the registry.
///
/// Implementations must be safe for concurrent use; the gateway shares one
/// instance across all requests.
pub trait AuthorityTransport: Send + Sync {
    /// POSTs a signed envelope and returns the raw response body.
    ///
    /// A SOAP fault delivered with HTTP 500 is returned as a body, so the
    /// verifier can report it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network failure or an unexpected status.
    fn send<'a>(
        &'a self,
        envelope: &'a [u8],
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send + 'a;

    /// Probes the registry endpoint; succeeds only on HTTP 200.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint is unreachable or not healthy.
    fn ping(&self) -> impl Future<Output = Result<(), TransportError>> + Send + '_;
}
