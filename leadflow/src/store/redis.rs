//! Redis-backed store shared by every worker process.

use super::SharedStore;
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// Replaces the element with a unique marker, then removes the marker, so the
// read and the removal happen in one server-side step.
const REMOVE_AT_SCRIPT: &str = r"
local value = redis.call('LINDEX', KEYS[1], ARGV[1])
if not value then
  return false
end
redis.call('LSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('LREM', KEYS[1], 1, ARGV[2])
return value
";

/// [`SharedStore`] over a Redis server.
///
/// Non-blocking commands share one auto-reconnecting connection. A BRPOP
/// holds its connection until it returns, so blocking pops draw from a
/// separate pool: one connection per concurrent popper (in practice, per
/// worker), handed back after each pop and dropped if it errors.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    remove_at: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .field("idle_blocking", &self.blocking.lock().len())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://localhost:6379`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        tracing::info!(url = %url, "Connected to redis store");
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            remove_at: Script::new(REMOVE_AT_SCRIPT),
        })
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection, StoreError> {
        let idle = self.blocking.lock().pop();
        match idle {
            Some(conn) => Ok(conn),
            None => {
                tracing::debug!("Opening blocking redis connection");
                Ok(self.client.get_multiplexed_async_connection().await?)
            }
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn hincr_many(&self, key: &str, deltas: &[(&str, i64)]) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, delta) in deltas {
            pipe.hincr(key, *field, *delta).ignore();
        }
        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(hash)
    }

    async fn push_front(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.lpush(key, value).await?;
        Ok(len)
    }

    async fn push_back(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn pop_back_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.checkout_blocking().await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        self.blocking.lock().push(conn);
        Ok(popped.map(|(_, value)| value))
    }

    async fn range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = start.saturating_add(count - 1);
        let mut conn = self.conn.clone();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn remove_at(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        let marker = format!("__leadflow_removed:{}", Uuid::new_v4());
        let mut conn = self.conn.clone();
        let value: Option<String> = self
            .remove_at
            .key(key)
            .arg(index)
            .arg(marker)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a live server: LEADFLOW_TEST_REDIS=redis://localhost:6379
    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_remove_at_against_server() {
        let url = std::env::var("LEADFLOW_TEST_REDIS")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("leadflow:test:{}", Uuid::new_v4());

        for value in ["a", "b", "c"] {
            store.push_back(&key, value.to_string()).await.unwrap();
        }
        assert_eq!(store.remove_at(&key, 1).await.unwrap(), Some("b".to_string()));
        assert_eq!(store.remove_at(&key, 9).await.unwrap(), None);
        assert_eq!(store.range(&key, 0, 10).await.unwrap(), vec!["a", "c"]);

        store.pop_front(&key).await.unwrap();
        store.pop_front(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn test_blocking_connection_is_reused() {
        let url = std::env::var("LEADFLOW_TEST_REDIS")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("leadflow:test:{}", Uuid::new_v4());

        for _ in 0..3 {
            let popped = store
                .pop_back_blocking(&key, Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(popped, None);
            assert_eq!(store.blocking.lock().len(), 1);
        }
    }
}
