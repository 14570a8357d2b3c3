//! Redis backing store.
//!
//! Plain commands go through a shared [`ConnectionManager`]. `WATCH` is
//! connection-scoped, so every optimistic transaction opens its own
//! connection; an `EXEC` answered with nil surfaces as
//! [`StoreError::Conflict`].

use redis::{AsyncCommands, Client, RedisError, aio::ConnectionManager};
use tracing::debug;

use super::store::{FieldWrites, KeyValueStore, Record, RenameOutcome, StoreError};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Hash store on a Redis server (`redis://` or `rediss://`).
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("addr", &self.client.get_connection_info().addr).finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        debug!(addr = %client.get_connection_info().addr, "connected to redis");
        Ok(Self { client, manager })
    }

    async fn transaction_connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Escapes the `MATCH` glob metacharacters in a literal prefix.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn unwatch(con: &mut redis::aio::MultiplexedConnection) -> Result<(), StoreError> {
    let () = redis::cmd("UNWATCH").query_async(con).await?;
    Ok(())
}

impl KeyValueStore for RedisStore {
    async fn hset_nx_all<'a>(&'a self, key: &'a str, fields: &'a [(String, Vec<u8>)]) -> Result<bool, StoreError> {
        let mut con = self.transaction_connection().await?;
        let () = redis::cmd("WATCH").arg(key).query_async(&mut con).await?;

        let exists: bool = con.exists(key).await?;
        if exists {
            unwatch(&mut con).await?;
            return Ok(false);
        }

        let committed: Option<()> = redis::pipe().atomic().hset_multiple(key, fields).query_async(&mut con).await?;
        committed.map(|()| true).ok_or(StoreError::Conflict)
    }

    async fn hget_all<'a>(&'a self, key: &'a str) -> Result<Record, StoreError> {
        let mut con = self.manager.clone();
        Ok(con.hgetall(key).await?)
    }

    async fn rename_nx<'a>(&'a self, from: &'a str, to: &'a str) -> Result<RenameOutcome, StoreError> {
        let mut con = self.transaction_connection().await?;
        let () = redis::cmd("WATCH").arg(from).arg(to).query_async(&mut con).await?;

        let source: bool = con.exists(from).await?;
        if !source {
            unwatch(&mut con).await?;
            return Ok(RenameOutcome::SourceMissing);
        }
        let target: bool = con.exists(to).await?;
        if target {
            unwatch(&mut con).await?;
            return Ok(RenameOutcome::TargetExists);
        }

        let committed: Option<()> = redis::pipe().atomic().rename(from, to).query_async(&mut con).await?;
        committed.map(|()| RenameOutcome::Renamed).ok_or(StoreError::Conflict)
    }

    async fn delete<'a>(&'a self, key: &'a str) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        let removed: u32 = con.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan_prefix<'a>(&'a self, prefix: &'a str) -> Result<Vec<String>, StoreError> {
        let mut con = self.manager.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn update_watched<'a, F, E>(&'a self, key: &'a str, update: F) -> Result<Result<(), E>, StoreError>
    where
        F: FnOnce(Record) -> Result<FieldWrites, E> + Send + 'a,
        E: Send + 'a,
    {
        let mut con = self.transaction_connection().await?;
        let () = redis::cmd("WATCH").arg(key).query_async(&mut con).await?;

        let current: Record = con.hgetall(key).await?;
        let writes = match update(current) {
            Ok(writes) => writes,
            Err(e) => {
                unwatch(&mut con).await?;
                return Ok(Err(e));
            }
        };

        let committed: Option<()> = redis::pipe().atomic().hset_multiple(key, writes.as_slice()).query_async(&mut con).await?;
        committed.map(|()| Ok(())).ok_or(StoreError::Conflict)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob(""), "");
        assert_eq!(escape_glob("eet:"), "eet:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }
}
