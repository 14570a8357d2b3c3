//! Fixtures for unit tests: throwaway PKIs, sample sales and an in-process
//! authority that answers with signed responses.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{
    Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    nid::Nid,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    rsa::Rsa,
    stack::Stack,
    x509::{
        X509, X509NameBuilder,
        extension::{BasicConstraints, KeyUsage},
    },
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    certs::PinnedRoots,
    sale::{Sale, codes},
    soap::{
        EET_NS, SOAP_ENV_NS, sign,
        verifier::{check_signature, signer_certificate},
        wrap_body,
    },
    transport::{AuthorityTransport, TransportError},
    xml::Document,
};

/// Organisation name the authority's signing certificate carries.
pub const AUTHORITY_ORG: &str = "Česká republika - Generální finanční ředitelství";

/// FIK handed out by [`MockAuthority`].
pub const TEST_FIK: &str = "b3a09b52-7c87-4014-a496-4c7a53cf9120-ff";

/// A root CA and one leaf it issued.
pub struct TestPki {
    pub ca_cert: X509,
    pub leaf_cert: X509,
    pub leaf_key: PKey<Private>,
}

impl TestPki {
    fn generate(ca_org: &str, leaf_cn: &str, leaf_org: &str) -> Self {
        let ca_key = rsa_key();
        let ca_cert = certificate(1, &format!("{ca_org} Root"), ca_org, &ca_key, None);
        let leaf_key = rsa_key();
        let leaf_cert = certificate(2, leaf_cn, leaf_org, &leaf_key, Some((&ca_cert, &ca_key)));
        Self { ca_cert, leaf_cert, leaf_key }
    }
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn certificate(
    serial: u32,
    common_name: &str,
    organization: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization).unwrap();
    name.append_entry_by_nid(Nid::COUNTRYNAME, "CZ").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap()).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();

    match issuer {
        None => {
            builder.set_issuer_name(&name).unwrap();
            builder.append_extension(BasicConstraints::new().critical().ca().build().unwrap()).unwrap();
            builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap()).unwrap();
            builder.sign(key, MessageDigest::sha256()).unwrap();
        }
        Some((ca_cert, ca_key)) => {
            builder.set_issuer_name(ca_cert.subject_name()).unwrap();
            builder.append_extension(BasicConstraints::new().build().unwrap()).unwrap();
            builder
                .append_extension(KeyUsage::new().critical().digital_signature().non_repudiation().build().unwrap())
                .unwrap();
            builder.sign(ca_key, MessageDigest::sha256()).unwrap();
        }
    }
    builder.build()
}

/// PKI of a test merchant.
pub fn merchant_pki() -> &'static TestPki {
    static PKI: OnceLock<TestPki> = OnceLock::new();
    PKI.get_or_init(|| TestPki::generate("EET Test Merchant CA", "CZ00000019", "EET Test Merchant"))
}

/// PKI of the test authority; its leaf carries [`AUTHORITY_ORG`].
pub fn authority_pki() -> &'static TestPki {
    static PKI: OnceLock<TestPki> = OnceLock::new();
    PKI.get_or_init(|| TestPki::generate("EET Test Authority CA", "eet-response-signer", AUTHORITY_ORG))
}

/// A leaf issued by a self-signed certificate whose basic constraints say
/// `CA:FALSE`; the issuer has no key usage restrictions.
pub fn non_ca_pki() -> &'static TestPki {
    static PKI: OnceLock<TestPki> = OnceLock::new();
    PKI.get_or_init(|| {
        let issuer_key = rsa_key();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "EET Test End Entity").unwrap();
        name.append_entry_by_nid(Nid::COUNTRYNAME, "CZ").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap()).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&issuer_key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
        builder.append_extension(BasicConstraints::new().critical().build().unwrap()).unwrap();
        builder.sign(&issuer_key, MessageDigest::sha256()).unwrap();
        let ca_cert = builder.build();

        let leaf_key = rsa_key();
        let leaf_cert = certificate(8, "CZ00000027", "EET Test Merchant", &leaf_key, Some((&ca_cert, &issuer_key)));
        TestPki { ca_cert, leaf_cert, leaf_key }
    })
}

pub fn merchant_roots() -> PinnedRoots {
    PinnedRoots::new(vec![merchant_pki().ca_cert.clone()])
}

pub fn authority_roots() -> PinnedRoots {
    PinnedRoots::new(vec![authority_pki().ca_cert.clone()])
}

/// Bundles the leaf, its key and the CA into a PKCS#12 file.
pub fn build_pkcs12(pki: &TestPki, password: &str) -> Vec<u8> {
    let mut ca = Stack::new().unwrap();
    ca.push(pki.ca_cert.clone()).unwrap();
    Pkcs12::builder()
        .name("merchant")
        .pkey(&pki.leaf_key)
        .cert(&pki.leaf_cert)
        .ca(ca)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

/// A valid sale without computed codes.
pub fn sample_sale() -> Sale {
    serde_json::from_value(json!({
        "uuid_zpravy": Uuid::new_v4(),
        "dat_odesl": "2019-08-11T15:36:25+02:00",
        "prvni_zaslani": true,
        "dic_popl": "CZ00000019",
        "id_provoz": 141,
        "id_pokl": "1patro-vpravo",
        "porad_cis": "141-18543-05",
        "dat_trzby": "2019-08-11T15:36:14+02:00",
        "celk_trzba": "236.00",
        "zakl_dan1": "195.04",
        "dan1": "40.96",
        "rezim": 0
    }))
    .unwrap()
}

/// [`sample_sale`] stamped with the merchant key.
pub fn stamped_sale() -> Sale {
    let mut sale = sample_sale();
    codes::stamp(&mut sale, &merchant_pki().leaf_key).unwrap();
    sale
}

/// A response envelope around `body_xml`, signed by the leaf of `pki`.
pub fn authority_response(body_xml: &str, pki: &TestPki) -> String {
    sign(&wrap_body(body_xml, &pki.leaf_cert.to_der().unwrap()), &pki.leaf_key).unwrap()
}

/// How [`MockAuthority`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Signed `Potvrzeni` with one warning.
    Confirm,
    /// Signed `Chyba` with code 4.
    Reject,
    /// Signed confirmation whose body was altered afterwards.
    Tamper,
    /// Signed confirmation echoing a different message UUID.
    WrongUuid,
    /// Unsigned SOAP fault.
    Fault,
    /// Transport failure.
    Unreachable,
    /// Never answers.
    Hang,
}

/// In-process authority.
///
/// Checks the signature of every request and records it.
#[derive(Debug)]
pub struct MockAuthority {
    mode: AuthorityMode,
    healthy: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl MockAuthority {
    pub fn new(mode: AuthorityMode) -> Self {
        Self { mode, healthy: AtomicBool::new(true), requests: Mutex::new(Vec::new()) }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Envelopes received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(&self, request: &str) -> String {
        let doc = Document::parse(request.as_bytes()).unwrap();
        let merchant_cert = signer_certificate(&doc).unwrap();
        check_signature(&doc, &merchant_cert).expect("request signature must verify");

        let mut steps = vec![(SOAP_ENV_NS, "Envelope"), (SOAP_ENV_NS, "Body"), (EET_NS, "Trzba"), (EET_NS, "Hlavicka")];
        let header = doc.find_path(&steps).unwrap();
        let uuid = doc.element_at(&header).unwrap().attribute("uuid_zpravy").unwrap().to_owned();
        steps.pop();
        steps.extend([(EET_NS, "KontrolniKody"), (EET_NS, "bkp")]);
        let bkp_path = doc.find_path(&steps).unwrap();
        let bkp = doc.element_at(&bkp_path).unwrap().text();

        let confirmation = |uuid: &str| {
            format!(
                r#"<eet:Odpoved xmlns:eet="{EET_NS}"><eet:Hlavicka uuid_zpravy="{uuid}" bkp="{bkp}" dat_prij="2019-08-11T15:36:25+02:00"/><eet:Potvrzeni fik="{TEST_FIK}" test="true"/><eet:Varovani kod_varov="1">DIC poplatnika v datove zprave se neshoduje s DIC v certifikatu</eet:Varovani></eet:Odpoved>"#
            )
        };

        match self.mode {
            AuthorityMode::Confirm => authority_response(&confirmation(&uuid), authority_pki()),
            AuthorityMode::Reject => authority_response(
                &format!(
                    r#"<eet:Odpoved xmlns:eet="{EET_NS}"><eet:Hlavicka uuid_zpravy="{uuid}" dat_odmit="2019-08-11T15:36:25+02:00"/><eet:Chyba kod="4" test="true">Neplatny podpis SOAP zpravy</eet:Chyba></eet:Odpoved>"#
                ),
                authority_pki(),
            ),
            AuthorityMode::Tamper => {
                authority_response(&confirmation(&uuid), authority_pki()).replace(TEST_FIK, "00000000-0000-0000-0000-000000000000-ff")
            }
            AuthorityMode::WrongUuid => {
                authority_response(&confirmation(&Uuid::new_v4().to_string()), authority_pki())
            }
            AuthorityMode::Fault => format!(
                r#"<soapenv:Envelope xmlns:soapenv="{SOAP_ENV_NS}"><soapenv:Body><soapenv:Fault><faultcode>soapenv:Server</faultcode><faultstring>Invalid message</faultstring></soapenv:Fault></soapenv:Body></soapenv:Envelope>"#
            ),
            AuthorityMode::Unreachable | AuthorityMode::Hang => unreachable!("no response in {:?} mode", self.mode),
        }
    }
}

impl AuthorityTransport for MockAuthority {
    async fn send<'a>(&'a self, envelope: &'a [u8]) -> Result<Vec<u8>, TransportError> {
        let request = String::from_utf8(envelope.to_vec()).unwrap();
        self.requests.lock().unwrap().push(request.clone());
        match self.mode {
            AuthorityMode::Unreachable => Err(TransportError::Status(503)),
            AuthorityMode::Hang => std::future::pending().await,
            _ => Ok(self.answer(&request).into_bytes()),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.healthy.load(Ordering::SeqCst) { Ok(()) } else { Err(TransportError::Status(503)) }
    }
}
