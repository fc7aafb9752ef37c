//! Process-local store used by tests and single-node deployments.

use super::SharedStore;
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;

/// In-memory implementation of [`SharedStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    hashes: DashMap<String, HashMap<String, i64>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_list<T>(&self, key: &str, f: impl FnOnce(&mut VecDeque<String>) -> T) -> T {
        let mut lists = self.lists.lock();
        let list = lists.entry(key.to_string()).or_default();
        f(list)
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn hincr_many(&self, key: &str, deltas: &[(&str, i64)]) -> Result<(), StoreError> {
        // The entry guard holds the shard lock for the whole update.
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        for (field, delta) in deltas {
            *hash.entry((*field).to_string()).or_insert(0) += delta;
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn push_front(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let len = self.with_list(key, |list| {
            list.push_front(value);
            list.len()
        });
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn push_back(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let len = self.with_list(key, |list| {
            list.push_back(value);
            list.len()
        });
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_list(key, VecDeque::pop_front))
    }

    async fn pop_back_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.with_list(key, VecDeque::pop_back) {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self.with_list(key, |list| {
            list.iter().skip(start).take(count).cloned().collect()
        }))
    }

    async fn remove_at(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        Ok(self.with_list(key, |list| list.remove(index)))
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.with_list(key, |list| list.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hincr_many_accumulates() {
        let store = InMemoryStore::new();
        store
            .hincr_many("gps:provider:A", &[("success_count", 1), ("total_latency_ms", 250)])
            .await
            .unwrap();
        store
            .hincr_many("gps:provider:A", &[("success_count", 1), ("total_latency_ms", 150)])
            .await
            .unwrap();

        let hash = store.hgetall("gps:provider:A").await.unwrap();
        assert_eq!(hash.get("success_count").unwrap(), "2");
        assert_eq!(hash.get("total_latency_ms").unwrap(), "400");
        assert!(store.hgetall("gps:provider:B").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.hincr_many("k", &[("n", 1)]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.hgetall("k").await.unwrap().get("n").unwrap(), "800");
    }

    #[tokio::test]
    async fn test_list_ops() {
        let store = InMemoryStore::new();
        store.push_back("dlq", "a".to_string()).await.unwrap();
        store.push_back("dlq", "b".to_string()).await.unwrap();
        store.push_back("dlq", "c".to_string()).await.unwrap();

        assert_eq!(store.range("dlq", 0, 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.remove_at("dlq", 1).await.unwrap(), Some("b".to_string()));
        assert_eq!(store.remove_at("dlq", 5).await.unwrap(), None);
        assert_eq!(store.pop_front("dlq").await.unwrap(), Some("a".to_string()));
        assert_eq!(store.len("dlq").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fifo_through_push_front_pop_back() {
        let store = InMemoryStore::new();
        store.push_front("q", "first".to_string()).await.unwrap();
        store.push_front("q", "second".to_string()).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(
            store.pop_back_blocking("q", timeout).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(
            store.pop_back_blocking("q", timeout).await.unwrap(),
            Some("second".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_times_out() {
        let store = InMemoryStore::new();
        let popped = store
            .pop_back_blocking("empty", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = Arc::new(InMemoryStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .pop_back_blocking("q", Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_front("q", "lead".to_string()).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some("lead".to_string()));
    }
}
