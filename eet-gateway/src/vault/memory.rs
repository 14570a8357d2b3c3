//! In-process backing store.
//!
//! Used by tests and by the `memory` vault backend during development.
//! Every operation runs under one lock, so transactions never interleave;
//! conflicts and outages can be injected to exercise the vault's retry and
//! error paths.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use super::store::{FieldWrites, KeyValueStore, Record, RenameOutcome, StoreError};

/// Hash store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, Record>>,
    pending_conflicts: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` watched transactions abort with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Simulates an outage: every operation fails until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn hashes(&self) -> Result<MutexGuard<'_, HashMap<String, Record>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".to_owned()));
        }
        self.hashes.lock().map_err(|_| StoreError::Backend("store lock poisoned".to_owned()))
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl KeyValueStore for MemoryStore {
    async fn hset_nx_all<'a>(&'a self, key: &'a str, fields: &'a [(String, Vec<u8>)]) -> Result<bool, StoreError> {
        let mut hashes = self.hashes()?;
        if hashes.contains_key(key) {
            return Ok(false);
        }
        if self.take_conflict() {
            return Err(StoreError::Conflict);
        }
        hashes.insert(key.to_owned(), fields.iter().cloned().collect());
        Ok(true)
    }

    async fn hget_all<'a>(&'a self, key: &'a str) -> Result<Record, StoreError> {
        Ok(self.hashes()?.get(key).cloned().unwrap_or_default())
    }

    async fn rename_nx<'a>(&'a self, from: &'a str, to: &'a str) -> Result<RenameOutcome, StoreError> {
        let mut hashes = self.hashes()?;
        if !hashes.contains_key(from) {
            return Ok(RenameOutcome::SourceMissing);
        }
        if hashes.contains_key(to) {
            return Ok(RenameOutcome::TargetExists);
        }
        if self.take_conflict() {
            return Err(StoreError::Conflict);
        }
        if let Some(record) = hashes.remove(from) {
            hashes.insert(to.to_owned(), record);
        }
        Ok(RenameOutcome::Renamed)
    }

    async fn delete<'a>(&'a self, key: &'a str) -> Result<bool, StoreError> {
        Ok(self.hashes()?.remove(key).is_some())
    }

    async fn scan_prefix<'a>(&'a self, prefix: &'a str) -> Result<Vec<String>, StoreError> {
        Ok(self.hashes()?.keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }

    async fn update_watched<'a, F, E>(&'a self, key: &'a str, update: F) -> Result<Result<(), E>, StoreError>
    where
        F: FnOnce(Record) -> Result<FieldWrites, E> + Send + 'a,
        E: Send + 'a,
    {
        let mut hashes = self.hashes()?;
        let current = hashes.get(key).cloned().unwrap_or_default();
        let writes = match update(current) {
            Ok(writes) => writes,
            Err(e) => return Ok(Err(e)),
        };
        if self.take_conflict() {
            return Err(StoreError::Conflict);
        }
        hashes.entry(key.to_owned()).or_default().extend(writes);
        Ok(Ok(()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.hashes().map(|_| ())
    }
}
