//! Backing store contract for the credential vault.
//!
//! A key to hash-map store with just enough transactional support for the
//! vault: guarded multi-field insert, atomic rename and an optimistic
//! read-modify-write. A transaction that loses a race reports
//! [`StoreError::Conflict`] and is retried by the caller.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::collections::HashMap;

use thiserror::Error;

use super::{memory::MemoryStore, redis::RedisStore};
use crate::config::{VaultBackend, VaultConfig};

/// All fields of one hash.
pub type Record = HashMap<String, Vec<u8>>;

/// Field writes produced by a read-modify-write.
pub type FieldWrites = Vec<(String, Vec<u8>)>;

/// Errors raised by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("backing store failure: {0}")]
    Backend(String),

    /// A watched key changed before the transaction committed.
    #[error("transaction aborted by a concurrent write")]
    Conflict,
}

/// Result of [`KeyValueStore::rename_nx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The hash now lives under the new key.
    Renamed,
    /// Nothing is stored under the old key.
    SourceMissing,
    /// The new key is already taken.
    TargetExists,
}

/// Hash store used by the vault.
pub trait KeyValueStore: Send + Sync {
    /// Sets every field of `key` in one transaction, only when `key` does not exist.
    ///
    /// Returns `false` when the key was already present.
    fn hset_nx_all<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(String, Vec<u8>)],
    ) -> impl Future<Output = Result<bool, StoreError>> + Send + 'a;

    /// Reads every field of `key`; a missing key yields an empty record.
    fn hget_all<'a>(&'a self, key: &'a str) -> impl Future<Output = Result<Record, StoreError>> + Send + 'a;

    /// Moves `from` to `to` in one transaction unless `to` exists.
    fn rename_nx<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> impl Future<Output = Result<RenameOutcome, StoreError>> + Send + 'a;

    /// Deletes `key`, returning whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> impl Future<Output = Result<bool, StoreError>> + Send + 'a;

    /// Enumerates keys starting with `prefix`, in no particular order.
    fn scan_prefix<'a>(&'a self, prefix: &'a str) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send + 'a;

    /// Reads `key` under a watch, lets `update` compute field writes and
    /// commits them only if `key` did not change in between.
    ///
    /// An `Err` from `update` aborts without writing and is returned as the
    /// inner result.
    fn update_watched<'a, F, E>(
        &'a self,
        key: &'a str,
        update: F,
    ) -> impl Future<Output = Result<Result<(), E>, StoreError>> + Send + 'a
    where
        F: FnOnce(Record) -> Result<FieldWrites, E> + Send + 'a,
        E: Send + 'a;

    /// Health probe.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send + '_;
}

/// Store selected by configuration.
#[derive(Debug)]
pub enum StoreBackend {
    /// Redis server.
    Redis(RedisStore),
    /// In-process map.
    Memory(MemoryStore),
}

impl StoreBackend {
    /// Opens the store named by `config`.
    pub async fn connect(config: &VaultConfig) -> Result<Self, StoreError> {
        match config.backend {
            VaultBackend::Redis => Ok(Self::Redis(RedisStore::connect(&config.url).await?)),
            VaultBackend::Memory => Ok(Self::Memory(MemoryStore::new())),
        }
    }
}

impl KeyValueStore for StoreBackend {
    async fn hset_nx_all<'a>(&'a self, key: &'a str, fields: &'a [(String, Vec<u8>)]) -> Result<bool, StoreError> {
        match self {
            Self::Redis(store) => store.hset_nx_all(key, fields).await,
            Self::Memory(store) => store.hset_nx_all(key, fields).await,
        }
    }

    async fn hget_all<'a>(&'a self, key: &'a str) -> Result<Record, StoreError> {
        match self {
            Self::Redis(store) => store.hget_all(key).await,
            Self::Memory(store) => store.hget_all(key).await,
        }
    }

    async fn rename_nx<'a>(&'a self, from: &'a str, to: &'a str) -> Result<RenameOutcome, StoreError> {
        match self {
            Self::Redis(store) => store.rename_nx(from, to).await,
            Self::Memory(store) => store.rename_nx(from, to).await,
        }
    }

    async fn delete<'a>(&'a self, key: &'a str) -> Result<bool, StoreError> {
        match self {
            Self::Redis(store) => store.delete(key).await,
            Self::Memory(store) => store.delete(key).await,
        }
    }

    async fn scan_prefix<'a>(&'a self, prefix: &'a str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Redis(store) => store.scan_prefix(prefix).await,
            Self::Memory(store) => store.scan_prefix(prefix).await,
        }
    }

    async fn update_watched<'a, F, E>(&'a self, key: &'a str, update: F) -> Result<Result<(), E>, StoreError>
    where
        F: FnOnce(Record) -> Result<FieldWrites, E> + Send + 'a,
        E: Send + 'a,
    {
        match self {
            Self::Redis(store) => store.update_watched(key, update).await,
            Self::Memory(store) => store.update_watched(key, update).await,
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Redis(store) => store.ping().await,
            Self::Memory(store) => store.ping().await,
        }
    }
}
