//! Merchant PKCS#12 bundles.
//!
//! The registry hands merchants a password-protected bundle holding the
//! signing certificate, its private key and the issuing root. The bags are
//! read structurally, so their order inside the file does not matter.

use openssl::{
    pkcs12::Pkcs12,
    x509::{X509Ref, X509VerifyResult},
};
use tracing::debug;

use super::{CertError, ChainVerifier, KeyPair, PinnedRoots};

/// Decodes a merchant bundle and checks it against the pinned roots.
///
/// The bundle's CA bag must contain the leaf's issuer; that issuer must be a
/// pinned root, must have signed the leaf and must be a CA. The private key
/// must belong to the leaf.
pub fn parse_merchant_pkcs12(der: &[u8], password: &str, roots: &PinnedRoots) -> Result<KeyPair, CertError> {
    let parsed = Pkcs12::from_der(der)
        .and_then(|bundle| bundle.parse2(password))
        .map_err(|e| CertError::Pkcs12(e.to_string()))?;

    let leaf = parsed.cert.ok_or(CertError::Missing("certificate"))?;
    let key = parsed.pkey.ok_or(CertError::Missing("private key"))?;
    let issuer = parsed
        .ca
        .as_ref()
        .into_iter()
        .flat_map(|stack| stack.iter())
        .find(|candidate| candidate.issued(&leaf) == X509VerifyResult::OK)
        .ok_or(CertError::Missing("issuer certificate"))?;

    if !roots.contains(issuer) {
        return Err(CertError::UntrustedIssuer);
    }
    if !is_ca(issuer)? {
        return Err(CertError::UntrustedIssuer);
    }
    let issuer_key = issuer.public_key()?;
    if !leaf.verify(&issuer_key)? {
        return Err(CertError::BadSignature);
    }
    roots.verify_chain(&leaf)?;

    debug!(subject = ?leaf.subject_name(), "merchant certificate accepted");
    KeyPair::new(leaf, key)
}

/// Whether `cert` carries `basicConstraints` with `CA:TRUE`.
fn is_ca(cert: &X509Ref) -> Result<bool, CertError> {
    let text = cert.to_text()?;
    let text = String::from_utf8_lossy(&text);
    let mut lines = text.lines().skip_while(|line| !line.trim_start().starts_with("X509v3 Basic Constraints"));
    Ok(lines.nth(1).is_some_and(|line| line.trim_start().starts_with("CA:TRUE")))
}
