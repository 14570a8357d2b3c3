//! HTTPS transport to the registry using reqwest.
//!
//! TLS 1.3 is the floor; plain HTTP endpoints are refused both at
//! construction and by the client itself.

use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use tracing::{debug, instrument};
use url::Url;

use super::{
    AuthorityTransport, TransportError,
    config::{AuthorityConfig, HttpVersion},
};
use crate::soap::SOAP_ACTION;

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// Largest response body read from the registry.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Validates the registry URL.
///
/// Only HTTPS endpoints are accepted.
fn validate_url(url: &Url) -> Result<(), TransportError> {
    if url.scheme() != "https" {
        return Err(TransportError::InvalidUrl(format!("only HTTPS URLs are allowed: {url}")));
    }
    if url.host_str().is_none() {
        return Err(TransportError::InvalidUrl(format!("URL missing host: {url}")));
    }
    Ok(())
}

/// Registry transport over HTTPS.
///
/// # Examples
///
/// ```
/// use eet_gateway::transport::{AuthorityConfig, Environment, HttpTransport, HttpVersion};
///
/// let config = AuthorityConfig { http_version: HttpVersion::Http1, ..AuthorityConfig::default() };
/// let endpoint = config.endpoint(Environment::Playground).unwrap();
///
/// let transport = HttpTransport::with_config(endpoint, &config).unwrap();
/// assert_eq!(transport.endpoint().host_str(), Some("pg.eet.cz"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Creates a transport with default client settings.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not HTTPS or the client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self, TransportError> {
        Self::with_config(endpoint, &AuthorityConfig::default())
    }

    /// Creates a transport with custom client settings.
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not HTTPS or the client cannot be built.
    pub fn with_config(endpoint: Url, config: &AuthorityConfig) -> Result<Self, TransportError> {
        validate_url(&endpoint)?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_3)
            .https_only(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout());

        builder = match config.http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Auto => builder,
        };

        let client = builder.build()?;

        Ok(Self { client, endpoint })
    }

    /// The registry URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Maps a response status to the transport outcome.
///
/// SOAP faults travel with 500 and are handed on for verification.
fn accept_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() || status == StatusCode::INTERNAL_SERVER_ERROR {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

/// Reads the body, giving up once it grows past `limit` bytes.
async fn read_body(mut response: Response, limit: usize) -> Result<Vec<u8>, TransportError> {
    let too_large = || TransportError::TooLarge { limit };
    if response.content_length().is_some_and(|len| usize::try_from(len).map_or(true, |len| len > limit)) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

impl AuthorityTransport for HttpTransport {
    #[instrument(skip(self, envelope), fields(endpoint = %self.endpoint, bytes = envelope.len()))]
    async fn send<'a>(&'a self, envelope: &'a [u8]) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("SOAPAction", SOAP_ACTION)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.to_vec())
            .send()
            .await?;

        let status = response.status();
        accept_status(status)?;

        let body = read_body(response, MAX_RESPONSE_BYTES).await?;
        debug!(status = status.as_u16(), bytes = body.len(), "registry responded");
        Ok(body)
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn ping(&self) -> Result<(), TransportError> {
        let response = self.client.head(self.endpoint.clone()).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(TransportError::Status(other.as_u16())),
        }
    }
}
