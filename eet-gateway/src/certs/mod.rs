//! Merchant key pairs and pinned certificate pools.
//!
//! Two pools are used: the registry's merchant roots, which every stored
//! merchant certificate must chain to, and the authority pool, which signs
//! responses. Both are plain [`PinnedRoots`] loaded from PEM files.
//!
//! # Examples
//!
//! ```no_run
//! use eet_gateway::certs::{ChainVerifier, PinnedRoots};
//!
//! # fn example(cert: &openssl::x509::X509Ref) -> Result<(), eet_gateway::certs::CertError> {
//! let roots = PinnedRoots::from_pem_files(&["/etc/eet/playground-roots.pem"])?;
//! roots.verify_chain(cert)?;
//! # Ok(())
//! # }
//! ```

pub mod pkcs12;

use std::{fmt, path::Path};

use openssl::{
    error::ErrorStack,
    pkey::{Id, PKey, PKeyRef, Private},
    stack::Stack,
    x509::{
        X509, X509Ref, X509StoreContext,
        store::{X509Store, X509StoreBuilder},
        verify::X509VerifyFlags,
    },
};
use thiserror::Error;

pub use pkcs12::parse_merchant_pkcs12;

/// Errors raised while decoding or trusting certificates.
#[derive(Debug, Error)]
pub enum CertError {
    /// The PKCS#12 container is malformed or the password is wrong.
    #[error("cannot decode PKCS#12 bundle: {0}")]
    Pkcs12(String),

    /// A required part of the bundle is absent.
    #[error("PKCS#12 bundle has no {0}")]
    Missing(&'static str),

    /// The issuer is not one of the pinned roots.
    #[error("issuer is not a pinned root certificate")]
    UntrustedIssuer,

    /// The issuer's key did not produce the leaf's signature.
    #[error("certificate was not signed by its issuer")]
    BadSignature,

    /// The private key does not belong to the certificate.
    #[error("private key does not match the certificate")]
    KeyMismatch,

    /// Only RSA keys can produce the registry's signatures.
    #[error("private key is not an RSA key")]
    NotRsa,

    /// Path validation against the pinned pool failed.
    #[error("certificate chain rejected: {0}")]
    Chain(String),

    /// A PEM file could not be read or parsed.
    #[error("cannot load certificates from {path}: {reason}")]
    Load {
        /// File that failed.
        path: String,
        /// Underlying error.
        reason: String,
    },

    /// OpenSSL failure.
    #[error(transparent)]
    Crypto(#[from] ErrorStack),
}

/// Validates a certificate against a trust pool.
///
/// Injected into [`ResponseVerifier`](crate::soap::ResponseVerifier) and used
/// by [`parse_merchant_pkcs12`], so tests can substitute their own pools.
pub trait ChainVerifier: Send + Sync + fmt::Debug {
    /// Verifies that `cert` chains to the pool; any extended key usage is accepted.
    fn verify_chain(&self, cert: &X509Ref) -> Result<(), CertError>;
}

/// A certificate together with its RSA private key.
#[derive(Clone)]
pub struct KeyPair {
    certificate: X509,
    private_key: PKey<Private>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("subject", &self.certificate.subject_name())
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Pairs a certificate with its private key.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::NotRsa`] for non-RSA keys and
    /// [`CertError::KeyMismatch`] when the key does not belong to the certificate.
    pub fn new(certificate: X509, private_key: PKey<Private>) -> Result<Self, CertError> {
        if private_key.id() != Id::RSA {
            return Err(CertError::NotRsa);
        }
        let cert_key = certificate.public_key()?;
        if !private_key.public_eq(&cert_key) {
            return Err(CertError::KeyMismatch);
        }
        Ok(Self { certificate, private_key })
    }

    /// The merchant certificate.
    #[must_use]
    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// The merchant's private key.
    #[must_use]
    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    /// DER encoding of the certificate.
    pub fn certificate_der(&self) -> Result<Vec<u8>, CertError> {
        Ok(self.certificate.to_der()?)
    }
}

/// A fixed set of trusted certificates.
///
/// Members act as trust anchors even when they are intermediates.
#[derive(Debug, Clone, Default)]
pub struct PinnedRoots {
    certs: Vec<X509>,
}

impl PinnedRoots {
    /// Creates a pool from certificates.
    #[must_use]
    pub fn new(certs: Vec<X509>) -> Self {
        Self { certs }
    }

    /// A pool that trusts nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses every certificate in a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertError> {
        Ok(Self { certs: X509::stack_from_pem(pem)? })
    }

    /// Loads and concatenates several PEM bundles.
    pub fn from_pem_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, CertError> {
        let mut certs = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let load_error = |reason: String| CertError::Load { path: path.display().to_string(), reason };
            let pem = std::fs::read(path).map_err(|e| load_error(e.to_string()))?;
            let loaded = X509::stack_from_pem(&pem).map_err(|e| load_error(e.to_string()))?;
            if loaded.is_empty() {
                return Err(load_error("no certificates found".to_owned()));
            }
            certs.extend(loaded);
        }
        Ok(Self { certs })
    }

    /// Whether `cert` is a member, compared by DER encoding.
    #[must_use]
    pub fn contains(&self, cert: &X509Ref) -> bool {
        let Ok(der) = cert.to_der() else {
            return false;
        };
        self.certs.iter().any(|pinned| pinned.to_der().is_ok_and(|pinned| pinned == der))
    }

    /// Number of certificates in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn store(&self) -> Result<X509Store, ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        for cert in &self.certs {
            builder.add_cert(cert.clone())?;
        }
        builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;
        Ok(builder.build())
    }
}

impl ChainVerifier for PinnedRoots {
    fn verify_chain(&self, cert: &X509Ref) -> Result<(), CertError> {
        if self.certs.is_empty() {
            return Err(CertError::Chain("no pinned certificates configured".to_owned()));
        }
        let store = self.store()?;
        let untrusted = Stack::new()?;
        let mut context = X509StoreContext::new()?;
        let outcome = context.init(&store, cert, &untrusted, |ctx| {
            Ok(if ctx.verify_cert()? { Ok(()) } else { Err(ctx.error().error_string().to_owned()) })
        })?;
        outcome.map_err(CertError::Chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{authority_pki, merchant_pki};

    #[test]
    fn test_key_pair_requires_matching_key() {
        let merchant = merchant_pki();
        assert!(KeyPair::new(merchant.leaf_cert.clone(), merchant.leaf_key.clone()).is_ok());

        let err = KeyPair::new(merchant.leaf_cert.clone(), authority_pki().leaf_key.clone()).unwrap_err();
        assert!(matches!(err, CertError::KeyMismatch));
    }

    #[test]
    fn test_key_pair_debug_redacts_key() {
        let merchant = merchant_pki();
        let pair = KeyPair::new(merchant.leaf_cert.clone(), merchant.leaf_key.clone()).unwrap();
        let text = format!("{pair:?}");
        assert!(text.contains("[redacted]"));
        assert!(!text.contains("PRIVATE"));
    }

    #[test]
    fn test_pinned_roots_contains() {
        let roots = PinnedRoots::new(vec![merchant_pki().ca_cert.clone()]);
        assert!(roots.contains(&merchant_pki().ca_cert));
        assert!(!roots.contains(&authority_pki().ca_cert));
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn test_verify_chain() {
        let roots = PinnedRoots::new(vec![merchant_pki().ca_cert.clone()]);
        assert!(roots.verify_chain(&merchant_pki().leaf_cert).is_ok());
        assert!(matches!(roots.verify_chain(&authority_pki().leaf_cert), Err(CertError::Chain(_))));
    }

    #[test]
    fn test_empty_pool_trusts_nothing() {
        let err = PinnedRoots::empty().verify_chain(&merchant_pki().leaf_cert).unwrap_err();
        assert!(matches!(err, CertError::Chain(_)));
    }

    #[test]
    fn test_from_pem() {
        let mut pem = merchant_pki().ca_cert.to_pem().unwrap();
        pem.extend(authority_pki().ca_cert.to_pem().unwrap());
        let roots = PinnedRoots::from_pem(&pem).unwrap();
        assert_eq!(roots.len(), 2);
        assert!(roots.contains(&authority_pki().ca_cert));
    }

    #[test]
    fn test_from_pem_files_reports_path() {
        let err = PinnedRoots::from_pem_files(&["/nonexistent/roots.pem"]).unwrap_err();
        assert!(matches!(err, CertError::Load { ref path, .. } if path == "/nonexistent/roots.pem"));
    }
}
