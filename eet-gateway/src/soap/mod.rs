//! SOAP envelope construction, XML-DSig signing and response verification.
//!
//! Requests follow WS-Security 1.1: the merchant certificate travels in a
//! `BinarySecurityToken`, and an enveloped `ds:Signature` covers the
//! `s:Body` through a single `Reference`. Responses from the registry are
//! signed the same way and are checked by [`verifier::ResponseVerifier`].

pub mod envelope;
pub mod response;
pub mod signer;
pub mod verifier;

pub use envelope::{build_envelope, trzba_xml, wrap_body};
pub use response::Response;
pub use signer::sign;
pub use verifier::ResponseVerifier;

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// WS-Security extension namespace.
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
/// WS-Security utility namespace (the `Id` attribute).
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// XML-DSig namespace.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
/// EET v3 message schema namespace.
pub const EET_NS: &str = "http://fs.mfcr.cz/eet/schema/v3";

/// Exclusive canonicalization without comments; also the namespace of `InclusiveNamespaces`.
pub const EXC_C14N_ALGORITHM: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// RSA PKCS#1 v1.5 with SHA-256.
pub const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
/// SHA-256 digest.
pub const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// `SOAPAction` header value for sale submission.
pub const SOAP_ACTION: &str = "http://fs.mfcr.cz/eet/OdeslaniTrzby";

/// `EncodingType` of the binary security token.
pub const BASE64_ENCODING: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";
/// `ValueType` of the binary security token.
pub const X509V3_VALUE_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3";

/// `u:Id` of the signed request body.
pub const BODY_ID: &str = "_1";
