//! Enveloped XML-DSig signing of request envelopes.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    error::ErrorStack,
    pkey::{PKeyRef, Private},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::{
    DSIG_NS, SOAP_ENV_NS, WSSE_NS,
    envelope::{DIGEST_PLACEHOLDER, SIGNATURE_PLACEHOLDER},
};
use crate::{
    sale::codes::sign_sha256,
    xml::{Document, XmlError, canonicalize},
};

/// Element names from the envelope root to `s:Body`.
pub(crate) const BODY_STEPS: [(&str, &str); 2] = [(SOAP_ENV_NS, "Envelope"), (SOAP_ENV_NS, "Body")];

/// Element names from the envelope root to `ds:Signature`.
pub(crate) const SIGNATURE_STEPS: [(&str, &str); 4] = [
    (SOAP_ENV_NS, "Envelope"),
    (SOAP_ENV_NS, "Header"),
    (WSSE_NS, "Security"),
    (DSIG_NS, "Signature"),
];

/// Errors while signing an envelope.
#[derive(Debug, Error)]
pub enum SignError {
    /// The envelope could not be parsed or canonicalised.
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// The template lacks an element or placeholder.
    #[error("envelope has no {0}")]
    MissingElement(&'static str),

    /// RSA signing failed.
    #[error("signing failed: {0}")]
    Crypto(#[from] ErrorStack),
}

/// Signs an envelope produced by [`build_envelope`](super::build_envelope).
///
/// The canonical `s:Body` is digested into `DigestValue`, then the canonical
/// `ds:SignedInfo` is signed into `SignatureValue`.
pub fn sign(envelope: &str, key: &PKeyRef<Private>) -> Result<String, SignError> {
    let doc = Document::parse(envelope.as_bytes())?;
    let body_path = doc.find_path(&BODY_STEPS).ok_or(SignError::MissingElement("s:Body"))?;
    let digest = Sha256::digest(canonicalize(&doc, &body_path, &[])?);
    let digest_value = STANDARD.encode(digest);
    debug!(digest = %digest_value, "computed body digest");

    let with_digest = splice(envelope, DIGEST_PLACEHOLDER, "DigestValue", &digest_value)?;

    let doc = Document::parse(with_digest.as_bytes())?;
    let mut signed_info_steps = SIGNATURE_STEPS.to_vec();
    signed_info_steps.push((DSIG_NS, "SignedInfo"));
    let signed_info_path =
        doc.find_path(&signed_info_steps).ok_or(SignError::MissingElement("ds:SignedInfo"))?;
    let signature = sign_sha256(&canonicalize(&doc, &signed_info_path, &[])?, key)?;

    splice(&with_digest, SIGNATURE_PLACEHOLDER, "SignatureValue", &STANDARD.encode(signature))
}

fn splice(envelope: &str, placeholder: &str, local: &'static str, value: &str) -> Result<String, SignError> {
    if !envelope.contains(placeholder) {
        return Err(SignError::MissingElement(local));
    }
    Ok(envelope.replacen(placeholder, &format!("<ds:{local}>{value}</ds:{local}>"), 1))
}
