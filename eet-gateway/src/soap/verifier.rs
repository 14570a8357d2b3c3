//! Verification of signed registry responses.
//!
//! A response is accepted only when every check passes, in this order:
//!
//! 1. the envelope parses and carries `wsse:Security/ds:Signature` and `s:Body`;
//!    a SOAP `Fault` body is reported as such;
//! 2. the signer certificate is read from `wsse:BinarySecurityToken`;
//! 3. its subject organisation equals the pinned authority name and it chains
//!    to the pinned authority pool;
//! 4. the single `ds:Reference` points at the body's `wsu:Id` and its digest
//!    matches the canonical body;
//! 5. `ds:SignatureValue` verifies over the canonical `ds:SignedInfo`;
//! 6. the echoed message UUID, when present, equals the request's;
//! 7. `Odpoved` is read into a [`Response`].

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    rsa::Padding,
    sign::Verifier,
    x509::{X509, X509Ref},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    DSIG_NS, EET_NS, EXC_C14N_ALGORITHM, RSA_SHA256_ALGORITHM, SHA256_ALGORITHM, SOAP_ENV_NS,
    WSSE_NS, WSU_NS,
    response::{Response, ResponseError},
    signer::{BODY_STEPS, SIGNATURE_STEPS},
};
use crate::{
    certs::{CertError, ChainVerifier},
    xml::{Document, Element, XmlError, canonicalize},
};

/// Errors while verifying a response.
///
/// [`is_parse_error`](Self::is_parse_error) separates malformed messages from
/// messages that are well-formed but fail an integrity check.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The bytes are not XML.
    #[error(transparent)]
    Xml(#[from] XmlError),

    /// The document is not a SOAP envelope.
    #[error("{0}")]
    Malformed(String),

    /// A required element is absent.
    #[error("response has no {0}")]
    MissingElement(&'static str),

    /// The authority answered with a SOAP fault.
    #[error("SOAP fault {code}: {message}")]
    Fault {
        /// `faultcode`.
        code: String,
        /// `faultstring`.
        message: String,
    },

    /// A base64 value could not be decoded.
    #[error("invalid base64 in {element}: {reason}")]
    Encoding {
        /// Element holding the value.
        element: &'static str,
        /// Decoder error.
        reason: String,
    },

    /// The `Odpoved` element is malformed.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The signer certificate could not be decoded.
    #[error("invalid signer certificate: {0}")]
    Certificate(String),

    /// The signer certificate names another organisation.
    #[error("signer organisation {found:?} does not match {expected:?}")]
    Organization {
        /// Pinned organisation name.
        expected: String,
        /// Organisation in the certificate.
        found: Option<String>,
    },

    /// The signer certificate does not chain to the authority pool.
    #[error(transparent)]
    Chain(#[from] CertError),

    /// The signature does not reference the body.
    #[error("reference mismatch: {0}")]
    ReferenceMismatch(String),

    /// An algorithm other than exclusive C14N, SHA-256 or RSA-SHA256 is used.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The body digest differs from `DigestValue`.
    #[error("body digest mismatch")]
    DigestMismatch,

    /// `SignatureValue` does not verify.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The response answers a different message.
    #[error("response UUID {found} does not match request UUID {expected}")]
    UuidMismatch {
        /// UUID of the request.
        expected: Uuid,
        /// UUID echoed in the response.
        found: Uuid,
    },

    /// OpenSSL failure.
    #[error(transparent)]
    Crypto(#[from] ErrorStack),
}

impl VerifyError {
    /// `true` when the response is malformed rather than untrustworthy.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::Xml(_)
                | Self::Malformed(_)
                | Self::MissingElement(_)
                | Self::Fault { .. }
                | Self::Encoding { .. }
                | Self::Response(_)
        )
    }
}

/// Checks responses against a pinned authority pool and organisation name.
#[derive(Debug, Clone)]
pub struct ResponseVerifier {
    chain: Arc<dyn ChainVerifier>,
    organization: String,
}

impl ResponseVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainVerifier>, organization: impl Into<String>) -> Self {
        Self { chain, organization: organization.into() }
    }

    /// Verifies a response to the request identified by `request_uuid`.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn verify(&self, bytes: &[u8], request_uuid: Uuid) -> Result<Response, VerifyError> {
        let result = self.verify_inner(bytes, request_uuid);
        if let Err(err) = &result {
            warn!(error = %err, "authority response rejected");
        }
        result
    }

    fn verify_inner(&self, bytes: &[u8], request_uuid: Uuid) -> Result<Response, VerifyError> {
        let doc = Document::parse(bytes)?;
        if !doc.root.is(SOAP_ENV_NS, "Envelope") {
            return Err(VerifyError::Malformed(format!("unexpected root element {}", doc.root.qualified_name())));
        }
        let body_path = doc.find_path(&BODY_STEPS).ok_or(VerifyError::MissingElement("s:Body"))?;
        let body = doc.element_at(&body_path).ok_or(VerifyError::MissingElement("s:Body"))?;
        check_fault(body)?;
        doc.find_path(&SIGNATURE_STEPS).ok_or(VerifyError::MissingElement("ds:Signature"))?;

        let cert = signer_certificate(&doc)?;
        let found = organization(&cert);
        if found.as_deref() != Some(self.organization.as_str()) {
            return Err(VerifyError::Organization { expected: self.organization.clone(), found });
        }
        self.chain.verify_chain(&cert)?;

        check_signature(&doc, &cert)?;

        let (_, odpoved) = body.child(EET_NS, "Odpoved").ok_or(VerifyError::MissingElement("Odpoved"))?;
        let response = Response::from_element(odpoved)?;
        if let Some(found) = response.header.uuid_zpravy
            && found != request_uuid
        {
            return Err(VerifyError::UuidMismatch { expected: request_uuid, found });
        }

        debug!(fik = ?response.fik(), "authority response verified");
        Ok(response)
    }
}

fn check_fault(body: &Element) -> Result<(), VerifyError> {
    let Some((_, fault)) = body.child(SOAP_ENV_NS, "Fault") else {
        return Ok(());
    };
    let field = |name: &str| {
        fault
            .child_elements()
            .find(|(_, e)| e.local == name)
            .map(|(_, e)| e.text().trim().to_owned())
            .unwrap_or_default()
    };
    Err(VerifyError::Fault { code: field("faultcode"), message: field("faultstring") })
}

fn organization(cert: &X509Ref) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(Nid::ORGANIZATIONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
}

/// Reads the signer certificate from `wsse:BinarySecurityToken`.
pub fn signer_certificate(doc: &Document) -> Result<X509, VerifyError> {
    let path = doc
        .find_path(&[
            (SOAP_ENV_NS, "Envelope"),
            (SOAP_ENV_NS, "Header"),
            (WSSE_NS, "Security"),
            (WSSE_NS, "BinarySecurityToken"),
        ])
        .ok_or(VerifyError::MissingElement("wsse:BinarySecurityToken"))?;
    let token = doc.element_at(&path).ok_or(VerifyError::MissingElement("wsse:BinarySecurityToken"))?;
    let der = decode_base64("BinarySecurityToken", &token.text())?;
    X509::from_der(&der).map_err(|e| VerifyError::Certificate(e.to_string()))
}

/// Checks the body digest and the `SignedInfo` signature against `cert`.
pub fn check_signature(doc: &Document, cert: &X509Ref) -> Result<(), VerifyError> {
    let signature_path = doc.find_path(&SIGNATURE_STEPS).ok_or(VerifyError::MissingElement("ds:Signature"))?;
    let signature = doc.element_at(&signature_path).ok_or(VerifyError::MissingElement("ds:Signature"))?;
    let (signed_info_index, signed_info) =
        signature.child(DSIG_NS, "SignedInfo").ok_or(VerifyError::MissingElement("ds:SignedInfo"))?;

    let c14n_method = required_child(signed_info, "CanonicalizationMethod")?;
    require_algorithm(c14n_method, EXC_C14N_ALGORITHM)?;
    require_algorithm(required_child(signed_info, "SignatureMethod")?, RSA_SHA256_ALGORITHM)?;

    let mut references = signed_info.children_named(DSIG_NS, "Reference");
    let reference = references.next().ok_or(VerifyError::MissingElement("ds:Reference"))?;
    if references.next().is_some() {
        return Err(VerifyError::ReferenceMismatch("more than one Reference".to_owned()));
    }

    let body_path = doc.find_path(&BODY_STEPS).ok_or(VerifyError::MissingElement("s:Body"))?;
    let body = doc.element_at(&body_path).ok_or(VerifyError::MissingElement("s:Body"))?;
    let body_id = body
        .attribute_ns(WSU_NS, "Id")
        .or_else(|| body.attribute("Id"))
        .ok_or_else(|| VerifyError::ReferenceMismatch("s:Body has no Id".to_owned()))?;
    let uri = reference.attribute("URI").unwrap_or_default();
    if uri.strip_prefix('#') != Some(body_id) {
        return Err(VerifyError::ReferenceMismatch(format!("URI {uri:?} does not point at body {body_id:?}")));
    }

    let mut body_prefixes = Vec::new();
    if let Some((_, transforms)) = reference.child(DSIG_NS, "Transforms") {
        for transform in transforms.children_named(DSIG_NS, "Transform") {
            require_algorithm(transform, EXC_C14N_ALGORITHM)?;
            body_prefixes.extend(inclusive_prefixes(transform));
        }
    }
    require_algorithm(required_child(reference, "DigestMethod")?, SHA256_ALGORITHM)?;

    let expected = decode_base64("DigestValue", &required_child(reference, "DigestValue")?.text())?;
    let body_prefixes: Vec<&str> = body_prefixes.iter().map(String::as_str).collect();
    let actual = Sha256::digest(canonicalize(doc, &body_path, &body_prefixes)?);
    if actual.as_slice() != expected.as_slice() {
        return Err(VerifyError::DigestMismatch);
    }

    let signed_info_prefixes = inclusive_prefixes(c14n_method);
    let signed_info_prefixes: Vec<&str> = signed_info_prefixes.iter().map(String::as_str).collect();
    let mut signed_info_path = signature_path;
    signed_info_path.push(signed_info_index);
    let canonical = canonicalize(doc, &signed_info_path, &signed_info_prefixes)?;

    let signature_value = decode_base64("SignatureValue", &required_child(signature, "SignatureValue")?.text())?;
    let public_key = cert.public_key()?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key)?;
    verifier.set_rsa_padding(Padding::PKCS1)?;
    verifier.update(&canonical)?;
    // Malformed signature lengths surface as errors from OpenSSL; both mean "does not verify".
    if verifier.verify(&signature_value).unwrap_or(false) {
        Ok(())
    } else {
        Err(VerifyError::SignatureInvalid)
    }
}

fn required_child<'a>(parent: &'a Element, local: &'static str) -> Result<&'a Element, VerifyError> {
    parent.child(DSIG_NS, local).map(|(_, e)| e).ok_or(VerifyError::MissingElement(local))
}

fn require_algorithm(element: &Element, expected: &str) -> Result<(), VerifyError> {
    match element.attribute("Algorithm") {
        Some(algorithm) if algorithm == expected => Ok(()),
        other => Err(VerifyError::UnsupportedAlgorithm(format!(
            "{}: {}",
            element.local,
            other.unwrap_or("<none>")
        ))),
    }
}

fn inclusive_prefixes(element: &Element) -> Vec<String> {
    element
        .child(EXC_C14N_ALGORITHM, "InclusiveNamespaces")
        .and_then(|(_, e)| e.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

fn decode_base64(element: &'static str, text: &str) -> Result<Vec<u8>, VerifyError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact).map_err(|e| VerifyError::Encoding { element, reason: e.to_string() })
}
