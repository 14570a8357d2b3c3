//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex, OnceLock};

use eet_gateway::{
    GatewayCore,
    certs::{KeyPair, PinnedRoots},
    sale::Sale,
    soap::{
        EET_NS, ResponseVerifier, SOAP_ENV_NS, sign,
        verifier::{check_signature, signer_certificate},
        wrap_body,
    },
    transport::{AuthorityTransport, TransportError},
    vault::{CredentialVault, MemoryStore},
    xml::Document,
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
    x509::{X509, X509NameBuilder, extension::BasicConstraints},
};

pub const AUTHORITY_ORG: &str = "Česká republika - Generální finanční ředitelství";
pub const FIK: &str = "93f4ae7e-1f2c-4c3c-8b8a-2ef3c8d7a6b1-ff";

pub struct Pki {
    pub root: X509,
    pub leaf: X509,
    pub key: PKey<Private>,
}

impl Pki {
    fn issue(root_cn: &str, leaf_cn: &str, organization: &str) -> Self {
        let root_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let root = cert(root_cn, organization, &root_key, None);
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let leaf = cert(leaf_cn, organization, &key, Some((&root, &root_key)));
        Self { root, leaf, key }
    }

    pub fn roots(&self) -> PinnedRoots {
        PinnedRoots::new(vec![self.root.clone()])
    }

    pub fn key_pair(&self) -> KeyPair {
        KeyPair::new(self.leaf.clone(), self.key.clone()).unwrap()
    }

    pub fn pkcs12(&self, password: &str) -> Vec<u8> {
        let mut chain = Stack::new().unwrap();
        chain.push(self.root.clone()).unwrap();
        Pkcs12::builder()
            .name("merchant")
            .pkey(&self.key)
            .cert(&self.leaf)
            .ca(chain)
            .build2(password)
            .unwrap()
            .to_der()
            .unwrap()
    }
}

fn cert(cn: &str, organization: &str, key: &PKey<Private>, issuer: Option<(&X509, &PKey<Private>)>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(u32::from(issuer.is_some()) + 1).unwrap();
    builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    match issuer {
        None => {
            builder.set_issuer_name(&name).unwrap();
            builder.append_extension(BasicConstraints::new().critical().ca().build().unwrap()).unwrap();
            builder.sign(key, MessageDigest::sha256()).unwrap();
        }
        Some((root, root_key)) => {
            builder.set_issuer_name(root.subject_name()).unwrap();
            builder.sign(root_key, MessageDigest::sha256()).unwrap();
        }
    }
    builder.build()
}

pub fn merchant() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| Pki::issue("Integration Merchant Root", "CZ00000019", "Integration Merchant"))
}

pub fn authority() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| Pki::issue("Integration Authority Root", "eet-signer", AUTHORITY_ORG))
}

/// A merchant whose root is not pinned anywhere.
pub fn stranger() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| Pki::issue("Unknown Root", "CZ00000019", "Somebody Else"))
}

pub fn sale() -> Sale {
    serde_json::from_value(serde_json::json!({
        "uuid_zpravy": uuid::Uuid::new_v4(),
        "prvni_zaslani": true,
        "dic_popl": "CZ00000019",
        "id_provoz": 273,
        "id_pokl": "pokladna-2",
        "porad_cis": "0/6460/ZQ42",
        "celk_trzba": "34113.00",
        "zakl_dan1": "-53.17",
        "dan1": "-11.17",
        "rezim": 0
    }))
    .unwrap()
}

/// What [`Registry`] does with an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    /// Signed answer altered after signing.
    Forge,
    /// Signed by a certificate outside the authority pool.
    Impostor,
    /// Never answers.
    Silent,
}

/// Registry stand-in speaking the signed SOAP protocol.
#[derive(Debug)]
pub struct Registry {
    reply: Reply,
    pub received: Mutex<Vec<String>>,
}

impl Registry {
    pub fn new(reply: Reply) -> Self {
        Self { reply, received: Mutex::new(Vec::new()) }
    }

    fn respond(&self, request: &str) -> String {
        let doc = Document::parse(request.as_bytes()).unwrap();
        check_signature(&doc, &signer_certificate(&doc).unwrap()).unwrap();

        let header = doc
            .find_path(&[(SOAP_ENV_NS, "Envelope"), (SOAP_ENV_NS, "Body"), (EET_NS, "Trzba"), (EET_NS, "Hlavicka")])
            .unwrap();
        let uuid = doc.element_at(&header).unwrap().attribute("uuid_zpravy").unwrap().to_owned();

        let body = format!(
            r#"<eet:Odpoved xmlns:eet="{EET_NS}"><eet:Hlavicka uuid_zpravy="{uuid}" dat_prij="2016-09-01T12:00:00+02:00"/><eet:Potvrzeni fik="{FIK}" test="true"/></eet:Odpoved>"#
        );
        let signer = if self.reply == Reply::Impostor { stranger() } else { authority() };
        let signed = sign(&wrap_body(&body, &signer.leaf.to_der().unwrap()), &signer.key).unwrap();
        if self.reply == Reply::Forge { signed.replace("test=\"true\"", "test=\"false\"") } else { signed }
    }
}

impl AuthorityTransport for Registry {
    async fn send<'a>(&'a self, envelope: &'a [u8]) -> Result<Vec<u8>, TransportError> {
        let request = String::from_utf8(envelope.to_vec()).unwrap();
        self.received.lock().unwrap().push(request.clone());
        if self.reply == Reply::Silent {
            std::future::pending::<()>().await;
        }
        Ok(self.respond(&request).into_bytes())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub type TestGateway = GatewayCore<MemoryStore, Registry>;

pub fn gateway(reply: Reply) -> TestGateway {
    GatewayCore::new(
        CredentialVault::new(MemoryStore::new()),
        Registry::new(reply),
        merchant().roots(),
        ResponseVerifier::new(Arc::new(authority().roots()), AUTHORITY_ORG),
    )
}
