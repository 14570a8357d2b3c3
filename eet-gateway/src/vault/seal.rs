//! Password sealing of vault payloads.
//!
//! `K = SHA-256(password || salt)` keys AES-256-GCM; every payload gets a
//! fresh 12-byte nonce and is stored as `nonce || ciphertext || tag`.

use openssl::{
    error::ErrorStack,
    rand::rand_bytes,
    symm::{Cipher, decrypt_aead, encrypt_aead},
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::VaultError;

/// Length of the per-record salt.
pub const SALT_LEN: usize = 16;
/// Length of the AES-GCM nonce.
pub const NONCE_LEN: usize = 12;
/// Length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Derives the sealing key for a record.
pub(crate) fn derive_key(password: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    Zeroizing::new(hasher.finalize().into())
}

pub(crate) fn random_salt() -> Result<[u8; SALT_LEN], ErrorStack> {
    let mut salt = [0u8; SALT_LEN];
    rand_bytes(&mut salt)?;
    Ok(salt)
}

/// Seals `plaintext` under `key`.
pub(crate) fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    let mut nonce = [0u8; NONCE_LEN];
    rand_bytes(&mut nonce)?;

    let mut tag = [0u8; TAG_LEN];
    let ciphertext = encrypt_aead(Cipher::aes_256_gcm(), key, Some(&nonce), &[], plaintext, &mut tag)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);
    Ok(sealed)
}

/// Opens a sealed payload.
///
/// An authentication failure means the password was wrong.
pub(crate) fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::Corrupted(format!("sealed payload of {} bytes is truncated", sealed.len())));
    }
    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    decrypt_aead(Cipher::aes_256_gcm(), key, Some(nonce), &[], ciphertext, tag)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::BadPassword)
}
