//! The shared key-value/hash/list store behind stats, the DLQ and the
//! ingestion queue.
//!
//! The store handle is opened once per process and injected into the router,
//! the DLQ and the queue. Implementations must make every method atomic with
//! respect to concurrent callers from other workers.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

/// Protocol for the shared store backend.
///
/// Lists are addressed head-first: index 0 is the element `pop_front`
/// would return.
#[async_trait]
pub trait SharedStore: Send + Sync + Debug {
    /// Atomically adds each `(field, delta)` to the hash at `key`.
    async fn hincr_many(&self, key: &str, deltas: &[(&str, i64)]) -> Result<(), StoreError>;

    /// Reads every field of the hash at `key`. Missing keys read as empty.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Pushes onto the head of a list, returning the new length.
    async fn push_front(&self, key: &str, value: String) -> Result<usize, StoreError>;

    /// Pushes onto the tail of a list, returning the new length.
    async fn push_back(&self, key: &str, value: String) -> Result<usize, StoreError>;

    /// Pops from the head of a list without blocking.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Pops from the tail of a list, waiting up to `timeout` for an element.
    async fn pop_back_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Reads up to `count` elements starting at `start`.
    async fn range(&self, key: &str, start: usize, count: usize)
        -> Result<Vec<String>, StoreError>;

    /// Atomically removes and returns the element at `index`.
    async fn remove_at(&self, key: &str, index: usize) -> Result<Option<String>, StoreError>;

    /// Returns the length of a list.
    async fn len(&self, key: &str) -> Result<usize, StoreError>;
}

/// Parses an integer hash field, treating a missing field as zero.
pub(crate) fn parse_counter(
    hash: &HashMap<String, String>,
    key: &str,
    field: &str,
) -> Result<i64, StoreError> {
    match hash.get(field) {
        None => Ok(0),
        Some(raw) => raw.trim().parse::<i64>().map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("field '{field}' = {raw:?}: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        let mut hash = HashMap::new();
        hash.insert("success_count".to_string(), "12".to_string());
        hash.insert("failure_count".to_string(), "x".to_string());

        assert_eq!(parse_counter(&hash, "k", "success_count").unwrap(), 12);
        assert_eq!(parse_counter(&hash, "k", "total_latency_ms").unwrap(), 0);
        assert!(matches!(
            parse_counter(&hash, "k", "failure_count"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
