//! Request envelope construction.
//!
//! The envelope is a fixed template with two splice points: the base64 DER of
//! the merchant certificate in `wsse:BinarySecurityToken` and the `Trzba`
//! element under `s:Body u:Id="_1"`. `DigestValue` and `SignatureValue` are
//! left empty for [`sign`](super::sign) to fill.

use base64::{Engine, engine::general_purpose::STANDARD};
use quick_xml::{
    Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
};
use thiserror::Error;

use super::{
    BASE64_ENCODING, BODY_ID, DSIG_NS, EET_NS, EXC_C14N_ALGORITHM, RSA_SHA256_ALGORITHM,
    SHA256_ALGORITHM, SOAP_ENV_NS, WSSE_NS, WSU_NS, X509V3_VALUE_TYPE,
};
use crate::sale::{Regime, Sale, format_amount, format_datetime};

/// Empty digest placeholder in the template.
pub(crate) const DIGEST_PLACEHOLDER: &str = "<ds:DigestValue></ds:DigestValue>";
/// Empty signature placeholder in the template.
pub(crate) const SIGNATURE_PLACEHOLDER: &str = "<ds:SignatureValue></ds:SignatureValue>";

const TOKEN_ID: &str = "X509-cert";

/// Errors while composing an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// A field required on the wire has not been filled in.
    #[error("sale field {0} is not set")]
    MissingField(&'static str),

    /// The XML writer failed.
    #[error("failed to write XML: {0}")]
    Write(String),
}

/// Renders the `Trzba` element for a stamped sale.
///
/// `dat_odesl`, `dat_trzby`, `pkp` and `bkp` must be set.
pub fn trzba_xml(sale: &Sale) -> Result<String, EnvelopeError> {
    let dat_odesl = sale.dat_odesl.as_ref().ok_or(EnvelopeError::MissingField("dat_odesl"))?;
    let dat_trzby = sale.dat_trzby.as_ref().ok_or(EnvelopeError::MissingField("dat_trzby"))?;
    let pkp = sale.pkp.as_deref().ok_or(EnvelopeError::MissingField("pkp"))?;
    let bkp = sale.bkp.as_deref().ok_or(EnvelopeError::MissingField("bkp"))?;

    let mut header = BytesStart::new("Hlavicka");
    header.push_attribute(("uuid_zpravy", sale.uuid_zpravy.to_string().as_str()));
    header.push_attribute(("dat_odesl", format_datetime(dat_odesl).as_str()));
    header.push_attribute(("prvni_zaslani", bool_attr(sale.prvni_zaslani)));
    if let Some(overeni) = sale.overeni {
        header.push_attribute(("overeni", bool_attr(overeni)));
    }

    let mut data = BytesStart::new("Data");
    data.push_attribute(("dic_popl", sale.dic_popl.as_str()));
    if let Some(delegate) = &sale.dic_poverujiciho {
        data.push_attribute(("dic_poverujiciho", delegate.as_str()));
    }
    data.push_attribute(("id_provoz", sale.id_provoz.to_string().as_str()));
    data.push_attribute(("id_pokl", sale.id_pokl.as_str()));
    data.push_attribute(("porad_cis", sale.porad_cis.as_str()));
    data.push_attribute(("dat_trzby", format_datetime(dat_trzby).as_str()));
    for (name, value) in sale.amounts() {
        data.push_attribute((name, format_amount(value).as_str()));
    }
    data.push_attribute((
        "rezim",
        match sale.rezim {
            Regime::Standard => "0",
            Regime::Simplified => "1",
        },
    ));

    let pkp = STANDARD.encode(pkp);
    let mut writer = Writer::new(Vec::new());
    let events = [
        Event::Start(BytesStart::new("Trzba").with_attributes([("xmlns", EET_NS)])),
        Event::Empty(header),
        Event::Empty(data),
        Event::Start(BytesStart::new("KontrolniKody")),
        Event::Start(BytesStart::new("pkp").with_attributes([
            ("digest", "SHA256"),
            ("cipher", "RSA2048"),
            ("encoding", "base64"),
        ])),
        Event::Text(BytesText::new(&pkp)),
        Event::End(BytesEnd::new("pkp")),
        Event::Start(BytesStart::new("bkp").with_attributes([("digest", "SHA1"), ("encoding", "base16")])),
        Event::Text(BytesText::new(bkp)),
        Event::End(BytesEnd::new("bkp")),
        Event::End(BytesEnd::new("KontrolniKody")),
        Event::End(BytesEnd::new("Trzba")),
    ];
    for event in events {
        writer.write_event(event).map_err(|e| EnvelopeError::Write(e.to_string()))?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| EnvelopeError::Write(e.to_string()))
}

const fn bool_attr(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Wraps an already serialised body element in the signing template.
#[must_use]
pub fn wrap_body(body_xml: &str, cert_der: &[u8]) -> String {
    let token = STANDARD.encode(cert_der);
    format!(
        r##"<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:u="{WSU_NS}"><s:Header><wsse:Security xmlns:wsse="{WSSE_NS}" xmlns:wse="{WSU_NS}" s:mustUnderstand="1"><wsse:BinarySecurityToken EncodingType="{BASE64_ENCODING}" ValueType="{X509V3_VALUE_TYPE}" wse:Id="{TOKEN_ID}">{token}</wsse:BinarySecurityToken><ds:Signature xmlns:ds="{DSIG_NS}" Id="SIG-1"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{EXC_C14N_ALGORITHM}"></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="{RSA_SHA256_ALGORITHM}"></ds:SignatureMethod><ds:Reference URI="#{BODY_ID}"><ds:Transforms><ds:Transform Algorithm="{EXC_C14N_ALGORITHM}"></ds:Transform></ds:Transforms><ds:DigestMethod Algorithm="{SHA256_ALGORITHM}"></ds:DigestMethod>{DIGEST_PLACEHOLDER}</ds:Reference></ds:SignedInfo>{SIGNATURE_PLACEHOLDER}<ds:KeyInfo><wsse:SecurityTokenReference><wsse:Reference URI="#{TOKEN_ID}" ValueType="{X509V3_VALUE_TYPE}"></wsse:Reference></wsse:SecurityTokenReference></ds:KeyInfo></ds:Signature></wsse:Security></s:Header><s:Body u:Id="{BODY_ID}">{body_xml}</s:Body></s:Envelope>"##
    )
}

/// Builds the unsigned request envelope for a stamped sale.
pub fn build_envelope(sale: &Sale, cert_der: &[u8]) -> Result<String, EnvelopeError> {
    Ok(wrap_body(&trzba_xml(sale)?, cert_der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{merchant_pki, sample_sale},
        xml::Document,
    };

    fn stamped_sale() -> Sale {
        let mut sale = sample_sale();
        sale.pkp = Some(vec![0xAB; 4]);
        sale.bkp = Some("00000000-11111111-22222222-33333333-44444444".to_owned());
        sale
    }

    #[test]
    fn test_trzba_xml_shape() {
        let doc = Document::parse(trzba_xml(&stamped_sale()).unwrap().as_bytes()).unwrap();
        assert!(doc.root.is(EET_NS, "Trzba"));

        let (_, header) = doc.root.child(EET_NS, "Hlavicka").unwrap();
        assert_eq!(header.attribute("prvni_zaslani"), Some("true"));
        assert_eq!(header.attribute("overeni"), None);

        let (_, data) = doc.root.child(EET_NS, "Data").unwrap();
        assert_eq!(data.attribute("dic_popl"), Some("CZ00000019"));
        assert_eq!(data.attribute("celk_trzba"), Some("236.00"));
        assert_eq!(data.attribute("rezim"), Some("0"));

        let (_, codes) = doc.root.child(EET_NS, "KontrolniKody").unwrap();
        let (_, pkp) = codes.child(EET_NS, "pkp").unwrap();
        assert_eq!(pkp.text(), "q6urqw==");
        assert_eq!(pkp.attribute("cipher"), Some("RSA2048"));
        let (_, bkp) = codes.child(EET_NS, "bkp").unwrap();
        assert_eq!(bkp.attribute("encoding"), Some("base16"));
    }

    #[test]
    fn test_trzba_xml_escapes_values() {
        let mut sale = stamped_sale();
        sale.id_pokl = "a<b".to_owned();
        let xml = trzba_xml(&sale).unwrap();
        assert!(xml.contains("a&lt;b"));
        assert!(Document::parse(xml.as_bytes()).is_ok());
    }

    #[test]
    fn test_trzba_xml_requires_codes() {
        let sale = sample_sale();
        assert!(matches!(trzba_xml(&sale), Err(EnvelopeError::MissingField("pkp"))));
    }

    #[test]
    fn test_envelope_is_well_formed_and_references_body() {
        let cert = merchant_pki().leaf_cert.to_der().unwrap();
        let envelope = build_envelope(&stamped_sale(), &cert).unwrap();
        let doc = Document::parse(envelope.as_bytes()).unwrap();

        let body_path = doc.find_path(&[(SOAP_ENV_NS, "Envelope"), (SOAP_ENV_NS, "Body")]).unwrap();
        let body = doc.element_at(&body_path).unwrap();
        assert_eq!(body.attribute_ns(WSU_NS, "Id"), Some(BODY_ID));
        assert!(body.child(EET_NS, "Trzba").is_some());

        let reference = doc
            .find_path(&[
                (SOAP_ENV_NS, "Envelope"),
                (SOAP_ENV_NS, "Header"),
                (WSSE_NS, "Security"),
                (DSIG_NS, "Signature"),
                (DSIG_NS, "SignedInfo"),
                (DSIG_NS, "Reference"),
            ])
            .and_then(|path| doc.element_at(&path).cloned())
            .unwrap();
        assert_eq!(reference.attribute("URI"), Some("#_1"));

        let token = doc
            .find_path(&[
                (SOAP_ENV_NS, "Envelope"),
                (SOAP_ENV_NS, "Header"),
                (WSSE_NS, "Security"),
                (WSSE_NS, "BinarySecurityToken"),
            ])
            .and_then(|path| doc.element_at(&path).map(crate::xml::Element::text))
            .unwrap();
        assert_eq!(STANDARD.decode(token).unwrap(), cert);
    }

    #[test]
    fn test_envelope_is_deterministic() {
        let cert = merchant_pki().leaf_cert.to_der().unwrap();
        let sale = stamped_sale();
        assert_eq!(build_envelope(&sale, &cert).unwrap(), build_envelope(&sale, &cert).unwrap());
    }
}
