//! Encrypted credential vault.
//!
//! Each merchant key pair is stored as one hash keyed by its identifier, with
//! the fields `cert`, `key` and `salt`, and nothing else is written. An
//! optional namespace is prepended to every key when the store is shared. Certificate and key are PEM-encoded
//! and sealed with a key derived from the caller's password, so the backing
//! store never sees them in the clear.
//!
//! Read-modify-write operations are optimistic: a transaction that loses a
//! race with another vault instance is retried with backoff, and the caller
//! gets [`VaultError::MaxAttempts`] once the attempt budget is spent.
//!
//! # Examples
//!
//! ```rust,no_run
//! use eet_gateway::{
//!     certs::KeyPair,
//!     vault::{CredentialVault, MemoryStore},
//! };
//!
//! # async fn example(pair: KeyPair) -> Result<(), eet_gateway::vault::VaultError> {
//! let vault = CredentialVault::new(MemoryStore::new());
//!
//! vault.store("shop-1", b"secret", &pair).await?;
//! let unsealed = vault.get("shop-1", b"secret").await?;
//!
//! vault.update_password("shop-1", b"secret", b"rotated").await?;
//! # Ok(())
//! # }
//! ```

mod memory;
mod redis;
mod seal;
mod store;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use seal::{NONCE_LEN, SALT_LEN, TAG_LEN};
pub use store::{FieldWrites, KeyValueStore, Record, RenameOutcome, StoreBackend, StoreError};

use openssl::{
    error::ErrorStack,
    pkey::PKey,
    x509::X509,
};
use std::pin::Pin;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    certs::KeyPair,
    reliability::{RetryError, RetryPolicy, retry_with_backoff},
};

const FIELD_CERT: &str = "cert";
const FIELD_KEY: &str = "key";
const FIELD_SALT: &str = "salt";

/// Vault failures.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No record under the identifier.
    #[error("no credentials stored under {0:?}")]
    NotFound(String),

    /// The identifier is already taken.
    #[error("credentials already stored under {0:?}")]
    IdExists(String),

    /// The password does not open the record.
    #[error("wrong password")]
    BadPassword,

    /// The optimistic transaction kept conflicting.
    #[error("too many conflicting concurrent updates")]
    MaxAttempts,

    /// The backing store failed.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// A stored record is malformed.
    #[error("stored record is corrupted: {0}")]
    Corrupted(String),

    /// Key derivation, sealing or encoding failed.
    #[error("cryptographic failure: {0}")]
    Crypto(#[from] ErrorStack),

    /// A transaction aborted because of a concurrent write.
    #[error("concurrent modification")]
    Conflict,
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(msg) => Self::Unavailable(msg),
            StoreError::Conflict => Self::Conflict,
        }
    }
}

impl From<RetryError<Self>> for VaultError {
    fn from(err: RetryError<Self>) -> Self {
        match err {
            RetryError::Exhausted { .. } => Self::MaxAttempts,
            RetryError::Aborted(e) => e,
        }
    }
}

fn is_conflict(err: &VaultError) -> bool {
    matches!(err, VaultError::Conflict)
}

/// Seals a key pair into record fields under `password`.
fn seal_record(pair: &KeyPair, password: &[u8]) -> Result<FieldWrites, VaultError> {
    let salt = seal::random_salt()?;
    let key = seal::derive_key(password, &salt);

    let cert_pem = zeroize::Zeroizing::new(pair.certificate().to_pem()?);
    let key_pem = zeroize::Zeroizing::new(pair.private_key().private_key_to_pem_pkcs8()?);

    Ok(vec![
        (FIELD_CERT.to_owned(), seal::seal(&key, &cert_pem)?),
        (FIELD_KEY.to_owned(), seal::seal(&key, &key_pem)?),
        (FIELD_SALT.to_owned(), salt.to_vec()),
    ])
}

fn field<'r>(record: &'r Record, name: &'static str) -> Result<&'r [u8], VaultError> {
    record
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| VaultError::Corrupted(format!("missing field {name}")))
}

/// Opens record fields with `password`.
fn open_record(record: &Record, password: &[u8]) -> Result<KeyPair, VaultError> {
    let salt = field(record, FIELD_SALT)?;
    if salt.len() != SALT_LEN {
        return Err(VaultError::Corrupted(format!("salt is {} bytes", salt.len())));
    }
    let key = seal::derive_key(password, salt);

    let cert_pem = seal::open(&key, field(record, FIELD_CERT)?)?;
    let key_pem = seal::open(&key, field(record, FIELD_KEY)?)?;

    let certificate = X509::from_pem(&cert_pem).map_err(|e| VaultError::Corrupted(format!("certificate: {e}")))?;
    let private_key =
        PKey::private_key_from_pem(&key_pem).map_err(|e| VaultError::Corrupted(format!("private key: {e}")))?;
    KeyPair::new(certificate, private_key).map_err(|e| VaultError::Corrupted(e.to_string()))
}

/// Password-sealed key pairs over a [`KeyValueStore`].
#[derive(Debug)]
pub struct CredentialVault<S> {
    store: S,
    policy: RetryPolicy,
    namespace: String,
}

impl<S: KeyValueStore> CredentialVault<S> {
    /// Creates a vault with the default retry policy.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    /// Creates a vault whose optimistic loops follow `policy`.
    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy, namespace: String::new() }
    }

    /// Prepends `namespace` to every key. Empty by default.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The backing-store key of `id`.
    #[must_use]
    pub fn record_key(&self, id: &str) -> String {
        format!("{}{id}", self.namespace)
    }

    /// The backing store.
    pub fn backing_store(&self) -> &S {
        &self.store
    }

    /// Seals `pair` under `password` and stores it as `id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::IdExists`] if `id` is taken, [`VaultError::MaxAttempts`]
    /// if the insert keeps conflicting.
    #[instrument(skip(self, password, pair))]
    pub async fn store(&self, id: &str, password: &[u8], pair: &KeyPair) -> Result<(), VaultError> {
        let key = self.record_key(id);
        let fields = seal_record(pair, password)?;

        let inserted = retry_with_backoff(&self.policy, is_conflict, || async {
            Ok::<_, VaultError>(self.store.hset_nx_all(&key, &fields).await?)
        })
        .await?;

        if !inserted {
            return Err(VaultError::IdExists(id.to_owned()));
        }
        debug!("credentials stored");
        Ok(())
    }

    /// Unseals the key pair stored as `id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] or [`VaultError::BadPassword`].
    #[instrument(skip(self, password))]
    pub async fn get(&self, id: &str, password: &[u8]) -> Result<KeyPair, VaultError> {
        let record = self.store.hget_all(&self.record_key(id)).await?;
        if record.is_empty() {
            return Err(VaultError::NotFound(id.to_owned()));
        }
        open_record(&record, password)
    }

    /// Lists stored identifiers in lexicographic order, skipping `offset`
    /// and returning at most `limit`.
    ///
    /// The store has no ordered index, so every call scans all keys of the
    /// namespace and sorts them: time and memory grow with the number of
    /// stored identifiers, not with `limit`.
    #[instrument(skip(self))]
    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<String>, VaultError> {
        let namespace = self.namespace.as_str();
        let mut ids: Vec<String> = self
            .store
            .scan_prefix(namespace)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(namespace).map(str::to_owned))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }

    /// Renames `old_id` to `new_id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`], [`VaultError::IdExists`] or
    /// [`VaultError::MaxAttempts`].
    #[instrument(skip(self))]
    pub async fn update_id(&self, old_id: &str, new_id: &str) -> Result<(), VaultError> {
        let from = self.record_key(old_id);
        let to = self.record_key(new_id);

        let outcome = retry_with_backoff(&self.policy, is_conflict, || async {
            Ok::<_, VaultError>(self.store.rename_nx(&from, &to).await?)
        })
        .await?;

        match outcome {
            RenameOutcome::Renamed => Ok(()),
            RenameOutcome::SourceMissing => Err(VaultError::NotFound(old_id.to_owned())),
            RenameOutcome::TargetExists => Err(VaultError::IdExists(new_id.to_owned())),
        }
    }

    /// Re-seals the record `id` under `new_password`.
    ///
    /// The record is read, opened and re-sealed under a watch; a concurrent
    /// change restarts the cycle.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`], [`VaultError::BadPassword`] or
    /// [`VaultError::MaxAttempts`].
    #[instrument(skip(self, old_password, new_password))]
    pub async fn update_password(&self, id: &str, old_password: &[u8], new_password: &[u8]) -> Result<(), VaultError> {
        let key = self.record_key(id);

        retry_with_backoff(&self.policy, is_conflict, || async {
            // Boxed as `dyn Future + Send` so spawned callers do not hit
            // rust-lang/rust#100013 when proving the future `Send`.
            let update: Pin<Box<dyn Future<Output = Result<Result<(), VaultError>, StoreError>> + Send + '_>> =
                Box::pin(self.store.update_watched(&key, |record| {
                    if record.is_empty() {
                        return Err(VaultError::NotFound(id.to_owned()));
                    }
                    let pair = open_record(&record, old_password)?;
                    seal_record(&pair, new_password)
                }));
            update.await?
        })
        .await?;

        debug!("password rotated");
        Ok(())
    }

    /// Deletes the record `id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if nothing was deleted.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), VaultError> {
        if self.store.delete(&self.record_key(id)).await? {
            Ok(())
        } else {
            Err(VaultError::NotFound(id.to_owned()))
        }
    }

    /// Probes the backing store.
    ///
    /// # Errors
    ///
    /// [`VaultError::Unavailable`].
    pub async fn ping(&self) -> Result<(), VaultError> {
        Ok(self.store.ping().await?)
    }
}
