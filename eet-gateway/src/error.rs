//! Error types for the EET gateway.
//!
//! Every fallible core operation returns [`GatewayError`]. Module-level errors
//! ([`VaultError`], [`CertError`], [`VerifyError`], ...) are converted into it at
//! the [`GatewayCore`](crate::gateway::GatewayCore) boundary so that callers see a
//! fixed taxonomy regardless of which component failed.
//!
//! # Error Categories
//!
//! - **Credential errors** ([`GatewayError::CertNotFound`], [`GatewayError::BadCertPassword`],
//!   [`GatewayError::IdExists`], [`GatewayError::InvalidMerchantCert`]): caller input
//! - **Request errors** ([`GatewayError::InvalidSale`], [`GatewayError::RequestBuild`])
//! - **Authority errors** ([`GatewayError::AuthorityUnreachable`],
//!   [`GatewayError::ResponseParse`], [`GatewayError::ResponseVerify`])
//! - **Vault errors** ([`GatewayError::VaultUnavailable`], [`GatewayError::MaxAttempts`])
//!
//! # Examples
//!
//! ```
//! use eet_gateway::error::{ErrorKind, GatewayError};
//!
//! let err = GatewayError::CertNotFound("shop-1".to_owned());
//! assert_eq!(err.kind(), ErrorKind::CertNotFound);
//! assert_eq!(err.kind().status_code(), 404);
//! ```

use std::fmt;

use thiserror::Error;

use crate::{
    certs::CertError, sale::SaleValidationError, soap::verifier::VerifyError,
    transport::TransportError, vault::VaultError,
};

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Stable, transport-independent error classification.
///
/// The REST surface maps each kind to an HTTP status with
/// [`status_code`](Self::status_code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No stored key pair for the identifier.
    CertNotFound,
    /// The password does not open the stored key pair.
    BadCertPassword,
    /// The identifier is already occupied.
    IdExists,
    /// PKCS#12 bundle could not be parsed or its chain is not trusted.
    InvalidMerchantCert,
    /// The submitted sale violates a field constraint.
    InvalidSale,
    /// Envelope construction or signing failed.
    RequestBuild,
    /// Transport or TLS failure while talking to the authority.
    AuthorityUnreachable,
    /// The authority returned malformed SOAP/XML.
    ResponseParse,
    /// Digest, signature, certificate or message binding check failed.
    ResponseVerify,
    /// The backing store did not answer.
    VaultUnavailable,
    /// Optimistic retries were exhausted.
    MaxAttempts,
    /// The caller cancelled the operation.
    Cancelled,
    /// Anything else.
    Unexpected,
}

impl ErrorKind {
    /// HTTP status code the REST surface reports for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::CertNotFound => 404,
            Self::BadCertPassword => 401,
            Self::IdExists => 409,
            Self::InvalidMerchantCert | Self::InvalidSale => 400,
            Self::AuthorityUnreachable | Self::VaultUnavailable => 503,
            Self::Cancelled => 408,
            Self::RequestBuild
            | Self::ResponseParse
            | Self::ResponseVerify
            | Self::MaxAttempts
            | Self::Unexpected => 500,
        }
    }

    /// Machine-readable code used in JSON error bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CertNotFound => "CERT_NOT_FOUND",
            Self::BadCertPassword => "BAD_CERT_PASSWORD",
            Self::IdExists => "ID_EXISTS",
            Self::InvalidMerchantCert => "INVALID_MERCHANT_CERT",
            Self::InvalidSale => "INVALID_SALE",
            Self::RequestBuild => "REQUEST_BUILD",
            Self::AuthorityUnreachable => "AUTHORITY_UNREACHABLE",
            Self::ResponseParse => "RESPONSE_PARSE",
            Self::ResponseVerify => "RESPONSE_VERIFY",
            Self::VaultUnavailable => "VAULT_UNAVAILABLE",
            Self::MaxAttempts => "MAX_ATTEMPTS",
            Self::Cancelled => "CANCELLED",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the gateway core.
///
/// # Error Recovery
///
/// - **Transient errors** ([`AuthorityUnreachable`](Self::AuthorityUnreachable),
///   [`VaultUnavailable`](Self::VaultUnavailable), [`MaxAttempts`](Self::MaxAttempts)):
///   the caller may resubmit. A sale is never resent automatically; resubmissions
///   should set `prvni_zaslani = false`.
/// - **Input errors** ([`InvalidSale`](Self::InvalidSale),
///   [`InvalidMerchantCert`](Self::InvalidMerchantCert), [`IdExists`](Self::IdExists)):
///   fix the request.
/// - **Integrity errors** ([`ResponseParse`](Self::ResponseParse),
///   [`ResponseVerify`](Self::ResponseVerify)): the authority's answer must not be trusted.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No key pair is stored under the identifier.
    #[error("certificate not found: {0}")]
    CertNotFound(String),

    /// The password did not open the stored key pair.
    #[error("invalid certificate password")]
    BadCertPassword,

    /// The identifier is already taken.
    #[error("certificate ID already exists: {0}")]
    IdExists(String),

    /// The merchant's PKCS#12 bundle was rejected.
    #[error("invalid merchant certificate: {0}")]
    InvalidMerchantCert(#[from] CertError),

    /// The sale failed field validation.
    #[error("invalid sale: {0}")]
    InvalidSale(#[from] SaleValidationError),

    /// Security codes, envelope or XML signature could not be produced.
    #[error("failed to build request: {0}")]
    RequestBuild(String),

    /// The authority could not be reached.
    #[error("authority unreachable: {0}")]
    AuthorityUnreachable(#[from] TransportError),

    /// The authority's response is not a usable SOAP message.
    #[error("malformed authority response: {0}")]
    ResponseParse(VerifyError),

    /// The authority's response failed an integrity check.
    #[error("authority response verification failed: {0}")]
    ResponseVerify(VerifyError),

    /// The credential vault's backing store failed.
    #[error("credential vault unavailable: {0}")]
    VaultUnavailable(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("maximum number of attempts reached")]
    MaxAttempts,

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Uncategorised failure.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// One or more downstream health probes failed.
    #[error("health check failed: {0}")]
    Ping(#[from] PingError),
}

impl GatewayError {
    /// Returns the stable classification of this error.
    ///
    /// For [`GatewayError::Ping`] this is the kind of the most severe member.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CertNotFound(_) => ErrorKind::CertNotFound,
            Self::BadCertPassword => ErrorKind::BadCertPassword,
            Self::IdExists(_) => ErrorKind::IdExists,
            Self::InvalidMerchantCert(_) => ErrorKind::InvalidMerchantCert,
            Self::InvalidSale(_) => ErrorKind::InvalidSale,
            Self::RequestBuild(_) => ErrorKind::RequestBuild,
            Self::AuthorityUnreachable(_) => ErrorKind::AuthorityUnreachable,
            Self::ResponseParse(_) => ErrorKind::ResponseParse,
            Self::ResponseVerify(_) => ErrorKind::ResponseVerify,
            Self::VaultUnavailable(_) => ErrorKind::VaultUnavailable,
            Self::MaxAttempts => ErrorKind::MaxAttempts,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unexpected(_) => ErrorKind::Unexpected,
            Self::Ping(err) => err.kind(),
        }
    }
}

impl From<VaultError> for GatewayError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound(id) => Self::CertNotFound(id),
            VaultError::IdExists(id) => Self::IdExists(id),
            VaultError::BadPassword => Self::BadCertPassword,
            VaultError::MaxAttempts => Self::MaxAttempts,
            VaultError::Unavailable(msg) => Self::VaultUnavailable(msg),
            other @ (VaultError::Corrupted(_) | VaultError::Crypto(_) | VaultError::Conflict) => {
                Self::Unexpected(other.to_string())
            }
        }
    }
}

impl From<VerifyError> for GatewayError {
    fn from(err: VerifyError) -> Self {
        if err.is_parse_error() { Self::ResponseParse(err) } else { Self::ResponseVerify(err) }
    }
}

/// Failures reported by [`GatewayCore::ping`](crate::gateway::GatewayCore::ping).
///
/// Both downstreams are probed; every failure is kept.
#[derive(Debug, Error)]
pub struct PingError {
    errors: Vec<GatewayError>,
}

impl PingError {
    pub(crate) fn from_errors(errors: Vec<GatewayError>) -> Option<Self> {
        if errors.is_empty() { None } else { Some(Self { errors }) }
    }

    /// Returns every downstream failure.
    #[must_use]
    pub fn errors(&self) -> &[GatewayError] {
        &self.errors
    }

    /// Kind of the most severe member, judged by HTTP status.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.errors
            .iter()
            .map(GatewayError::kind)
            .max_by_key(|kind| kind.status_code())
            .unwrap_or(ErrorKind::Unexpected)
    }

    /// HTTP status for the aggregate.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GatewayError::CertNotFound("shop-1".into());
        assert_eq!(error.to_string(), "certificate not found: shop-1");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::CertNotFound.status_code(), 404);
        assert_eq!(ErrorKind::BadCertPassword.status_code(), 401);
        assert_eq!(ErrorKind::IdExists.status_code(), 409);
        assert_eq!(ErrorKind::InvalidMerchantCert.status_code(), 400);
        assert_eq!(ErrorKind::AuthorityUnreachable.status_code(), 503);
        assert_eq!(ErrorKind::VaultUnavailable.status_code(), 503);
        assert_eq!(ErrorKind::ResponseVerify.status_code(), 500);
        assert_eq!(ErrorKind::MaxAttempts.status_code(), 500);
    }

    #[test]
    fn test_vault_error_mapping() {
        let err: GatewayError = VaultError::NotFound("a".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::CertNotFound);

        let err: GatewayError = VaultError::BadPassword.into();
        assert_eq!(err.kind(), ErrorKind::BadCertPassword);

        let err: GatewayError = VaultError::IdExists("b".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::IdExists);

        let err: GatewayError = VaultError::Unavailable("down".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::VaultUnavailable);

        let err: GatewayError = VaultError::Corrupted("salt".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_verify_error_mapping() {
        let err: GatewayError = VerifyError::Malformed("eof".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::ResponseParse);

        let err: GatewayError = VerifyError::DigestMismatch.into();
        assert_eq!(err.kind(), ErrorKind::ResponseVerify);
    }

    #[test]
    fn test_ping_error_keeps_every_failure() {
        let err = PingError::from_errors(vec![
            GatewayError::VaultUnavailable("connection refused".to_owned()),
            GatewayError::Unexpected("boom".to_owned()),
        ])
        .unwrap();

        assert_eq!(err.errors().len(), 2);
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.kind(), ErrorKind::VaultUnavailable);
        let text = err.to_string();
        assert!(text.contains("connection refused"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_ping_error_empty_is_none() {
        assert!(PingError::from_errors(Vec::new()).is_none());
    }
}
