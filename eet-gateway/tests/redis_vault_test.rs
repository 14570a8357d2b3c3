//! Credential vault over a live Redis server.
//!
//! Runs only when `REDIS_URL` is set, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_vault_test`.
//! Every test writes under its own random namespace and removes it afterwards.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{authority, merchant};
use eet_gateway::{
    reliability::RetryPolicy,
    vault::{
        CredentialVault, FieldWrites, KeyValueStore, Record, RedisStore, RenameOutcome, StoreError, VaultError,
    },
};
use redis::Commands;
use uuid::Uuid;

fn redis_url() -> Option<String> {
    let url = std::env::var("REDIS_URL").ok();
    if url.is_none() {
        eprintln!("REDIS_URL not set, skipping");
    }
    url
}

fn namespace() -> String {
    format!("eet-test:{}:", Uuid::new_v4())
}

/// Writes `key` from a second, blocking connection.
fn touch(url: &str, key: &str) {
    let mut con = redis::Client::open(url).unwrap().get_connection().unwrap();
    let () = con.hset(key, "touched", 1).unwrap();
}

async fn cleanup(store: &RedisStore, namespace: &str) {
    for key in store.scan_prefix(namespace).await.unwrap() {
        store.delete(&key).await.unwrap();
    }
}

#[tokio::test]
async fn test_records_use_plain_hashes() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let vault = CredentialVault::new(RedisStore::connect(&url).await.unwrap()).with_namespace(ns.clone());

    vault.store("shop", b"pw", &merchant().key_pair()).await.unwrap();
    let record = vault.backing_store().hget_all(&format!("{ns}shop")).await.unwrap();
    let mut fields: Vec<&str> = record.keys().map(String::as_str).collect();
    fields.sort_unstable();
    assert_eq!(fields, ["cert", "key", "salt"]);

    assert!(matches!(vault.store("shop", b"pw", &merchant().key_pair()).await, Err(VaultError::IdExists(_))));
    assert!(vault.get("shop", b"pw").await.unwrap().private_key().public_eq(&merchant().key));

    cleanup(vault.backing_store(), &ns).await;
}

#[tokio::test]
async fn test_rename_and_list() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let vault = CredentialVault::new(RedisStore::connect(&url).await.unwrap()).with_namespace(ns.clone());

    vault.store("b", b"pw", &merchant().key_pair()).await.unwrap();
    vault.store("a", b"pw", &authority().key_pair()).await.unwrap();
    assert_eq!(vault.list(0, 10).await.unwrap(), ["a", "b"]);

    assert!(matches!(vault.update_id("a", "b").await, Err(VaultError::IdExists(_))));
    assert!(matches!(vault.update_id("ghost", "c").await, Err(VaultError::NotFound(_))));
    vault.update_id("a", "c").await.unwrap();
    assert_eq!(vault.list(0, 10).await.unwrap(), ["b", "c"]);
    assert_eq!(vault.list(1, 1).await.unwrap(), ["c"]);

    vault.delete("b").await.unwrap();
    assert!(matches!(vault.delete("b").await, Err(VaultError::NotFound(_))));

    cleanup(vault.backing_store(), &ns).await;
}

#[tokio::test]
async fn test_rename_nx_outcomes() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let store = RedisStore::connect(&url).await.unwrap();
    let key = |name: &str| format!("{ns}{name}");
    let fields = vec![("cert".to_owned(), b"c".to_vec())];

    assert_eq!(store.rename_nx(&key("x"), &key("y")).await.unwrap(), RenameOutcome::SourceMissing);
    assert!(store.hset_nx_all(&key("x"), &fields).await.unwrap());
    assert!(store.hset_nx_all(&key("y"), &fields).await.unwrap());
    assert_eq!(store.rename_nx(&key("x"), &key("y")).await.unwrap(), RenameOutcome::TargetExists);
    assert_eq!(store.rename_nx(&key("x"), &key("z")).await.unwrap(), RenameOutcome::Renamed);
    assert!(store.hget_all(&key("x")).await.unwrap().is_empty());

    cleanup(&store, &ns).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_between_watch_and_exec_conflicts() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let store = RedisStore::connect(&url).await.unwrap();
    let key = format!("{ns}shop");
    store.hset_nx_all(&key, &[("salt".to_owned(), vec![0])]).await.unwrap();

    let outcome = store
        .update_watched(&key, |_| {
            touch(&url, &key);
            Ok::<_, ()>(vec![("salt".to_owned(), vec![1])])
        })
        .await;
    assert!(matches!(outcome, Err(StoreError::Conflict)));
    assert_eq!(store.hget_all(&key).await.unwrap()["salt"], [0]);

    let outcome = store.update_watched(&key, |_| Ok::<_, ()>(vec![("salt".to_owned(), vec![2])])).await;
    assert!(matches!(outcome, Ok(Ok(()))));
    assert_eq!(store.hget_all(&key).await.unwrap()["salt"], [2]);

    cleanup(&store, &ns).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_rotations_have_one_winner() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let vault = Arc::new(CredentialVault::new(RedisStore::connect(&url).await.unwrap()).with_namespace(ns.clone()));
    vault.store("shop", b"p0", &merchant().key_pair()).await.unwrap();

    let tasks: Vec<_> = (1..=6)
        .map(|i| {
            let vault = Arc::clone(&vault);
            tokio::spawn(async move { vault.update_password("shop", b"p0", format!("p{i}").as_bytes()).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => winners += 1,
            Err(err) => assert!(matches!(err, VaultError::BadPassword), "unexpected {err:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert!(matches!(vault.get("shop", b"p0").await, Err(VaultError::BadPassword)));

    cleanup(vault.backing_store(), &ns).await;
}

/// Redis store whose every watched transaction is disturbed by another client.
#[derive(Debug)]
struct Contended {
    inner: RedisStore,
    url: String,
}

impl KeyValueStore for Contended {
    async fn hset_nx_all<'a>(&'a self, key: &'a str, fields: &'a [(String, Vec<u8>)]) -> Result<bool, StoreError> {
        self.inner.hset_nx_all(key, fields).await
    }

    async fn hget_all<'a>(&'a self, key: &'a str) -> Result<Record, StoreError> {
        self.inner.hget_all(key).await
    }

    async fn rename_nx<'a>(&'a self, from: &'a str, to: &'a str) -> Result<RenameOutcome, StoreError> {
        self.inner.rename_nx(from, to).await
    }

    async fn delete<'a>(&'a self, key: &'a str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn scan_prefix<'a>(&'a self, prefix: &'a str) -> Result<Vec<String>, StoreError> {
        self.inner.scan_prefix(prefix).await
    }

    async fn update_watched<'a, F, E>(&'a self, key: &'a str, update: F) -> Result<Result<(), E>, StoreError>
    where
        F: FnOnce(Record) -> Result<FieldWrites, E> + Send + 'a,
        E: Send + 'a,
    {
        let url = self.url.as_str();
        self.inner
            .update_watched(key, move |record| {
                touch(url, key);
                update(record)
            })
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contended_rotation_gives_up() {
    let Some(url) = redis_url() else { return };
    let ns = namespace();
    let store = Contended { inner: RedisStore::connect(&url).await.unwrap(), url: url.clone() };
    let vault = CredentialVault::with_policy(store, RetryPolicy::with_max_attempts(3)).with_namespace(ns.clone());
    vault.store("shop", b"pw", &merchant().key_pair()).await.unwrap();

    assert!(matches!(vault.update_password("shop", b"pw", b"new").await, Err(VaultError::MaxAttempts)));
    assert!(vault.get("shop", b"pw").await.is_ok());

    cleanup(&vault.backing_store().inner, &ns).await;
}
