//! Producer security codes.
//!
//! The signature code (`pkp`, PSC) is an RSA-SHA256 PKCS#1 v1.5 signature
//! over the pipe-separated plaintext
//! `dic_popl|id_provoz|id_pokl|porad_cis|dat_trzby|celk_trzba`. The fingerprint
//! code (`bkp`, FC) is the uppercase hex SHA-1 of the raw signature, split into
//! five groups of eight characters.
//!
//! # Examples
//!
//! ```
//! use eet_gateway::sale::codes::set_delimiters;
//!
//! assert_eq!(
//!     set_delimiters("ABA7EB197AD8D75360ED57B39AC9957EC192030B"),
//!     "ABA7EB19-7AD8D753-60ED57B3-9AC9957E-C192030B",
//! );
//! ```

use std::fmt::Write as _;

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKeyRef, Private},
    rsa::Padding,
    sign::Signer,
};
use thiserror::Error;

use super::{Sale, format_amount, format_datetime};

/// Length of a formatted fingerprint code.
pub const FC_LEN: usize = 44;

const FC_GROUP: usize = 8;

/// Errors while deriving security codes.
#[derive(Debug, Error)]
pub enum CodesError {
    /// `dat_trzby` must be set before the plaintext can be built.
    #[error("dat_trzby is not set")]
    MissingSaleDate,

    /// The RSA signing primitive failed.
    #[error("signing failed: {0}")]
    Signing(#[from] ErrorStack),
}

/// Builds the canonical plaintext the signature code is computed over.
pub fn plaintext(sale: &Sale) -> Result<String, CodesError> {
    let dat_trzby = sale.dat_trzby.as_ref().ok_or(CodesError::MissingSaleDate)?;
    Ok(format!(
        "{}|{}|{}|{}|{}|{}",
        sale.dic_popl,
        sale.id_provoz,
        sale.id_pokl,
        sale.porad_cis,
        format_datetime(dat_trzby),
        format_amount(sale.celk_trzba),
    ))
}

/// Computes the raw signature code of `sale` with the merchant key.
pub fn psc(sale: &Sale, key: &PKeyRef<Private>) -> Result<Vec<u8>, CodesError> {
    Ok(sign_sha256(plaintext(sale)?.as_bytes(), key)?)
}

/// RSA PKCS#1 v1.5 signature over the SHA-256 digest of `data`.
pub(crate) fn sign_sha256(data: &[u8], key: &PKeyRef<Private>) -> Result<Vec<u8>, ErrorStack> {
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.set_rsa_padding(Padding::PKCS1)?;
    signer.update(data)?;
    signer.sign_to_vec()
}

/// Computes the fingerprint code of a raw signature code.
#[must_use]
pub fn fc(psc: &[u8]) -> String {
    let digest = openssl::sha::sha1(psc);
    let hex = digest.iter().fold(String::with_capacity(digest.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02X}");
        out
    });
    set_delimiters(&hex)
}

/// Inserts `-` between every group of eight characters.
#[must_use]
pub fn set_delimiters(hex: &str) -> String {
    let mut out = String::with_capacity(hex.len() + hex.len() / FC_GROUP);
    for (i, ch) in hex.chars().enumerate() {
        if i > 0 && i % FC_GROUP == 0 {
            out.push('-');
        }
        out.push(ch);
    }
    out
}

/// Computes both codes and stores them on the sale.
pub fn stamp(sale: &mut Sale, key: &PKeyRef<Private>) -> Result<(), CodesError> {
    let pkp = psc(sale, key)?;
    sale.bkp = Some(fc(&pkp));
    sale.pkp = Some(pkp);
    Ok(())
}
