//! A shared store that fails on demand.

use crate::errors::StoreError;
use crate::store::{InMemoryStore, SharedStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Builds the `(key, value)` to append after a successful push, if any.
pub type PushHook = fn(&str) -> Option<(String, String)>;

#[derive(Debug)]
struct PushFault {
    prefix: String,
    allowed: usize,
    failures: usize,
}

/// An [`InMemoryStore`] whose list pushes can be made to fail.
///
/// Faults match keys by prefix. Each fault lets `allowed` pushes through,
/// then fails the next `failures` pushes, then lets everything through again.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    faults: Mutex<Vec<PushFault>>,
    hooks: Mutex<Vec<(String, PushHook)>>,
    failed_pushes: Mutex<usize>,
}

impl fmt::Debug for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyStore")
            .field("faults", &*self.faults.lock())
            .field("hooks", &self.hooks.lock().len())
            .field("failed_pushes", &self.failed_pushes())
            .finish_non_exhaustive()
    }
}

impl FaultyStore {
    /// Creates a store with no faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `failures` pushes to keys starting with `prefix`.
    #[must_use]
    pub fn fail_pushes(self, prefix: impl Into<String>, failures: usize) -> Self {
        self.fail_pushes_after(prefix, 0, failures)
    }

    /// Lets `allowed` pushes to keys starting with `prefix` through, then
    /// fails the next `failures`.
    #[must_use]
    pub fn fail_pushes_after(
        self,
        prefix: impl Into<String>,
        allowed: usize,
        failures: usize,
    ) -> Self {
        self.faults.lock().push(PushFault {
            prefix: prefix.into(),
            allowed,
            failures,
        });
        self
    }

    /// Runs `hook` after every successful push to `key` and appends what it
    /// returns.
    #[must_use]
    pub fn on_push(self, key: impl Into<String>, hook: PushHook) -> Self {
        self.hooks.lock().push((key.into(), hook));
        self
    }

    /// Number of pushes rejected so far.
    #[must_use]
    pub fn failed_pushes(&self) -> usize {
        *self.failed_pushes.lock()
    }

    fn check_push(&self, key: &str) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        let Some(fault) = faults.iter_mut().find(|f| key.starts_with(&f.prefix)) else {
            return Ok(());
        };
        if fault.allowed > 0 {
            fault.allowed -= 1;
            return Ok(());
        }
        if fault.failures > 0 {
            fault.failures -= 1;
            *self.failed_pushes.lock() += 1;
            return Err(StoreError::Backend(format!("push to '{key}' rejected")));
        }
        Ok(())
    }

    async fn run_hooks(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let extra: Vec<(String, String)> = self
            .hooks
            .lock()
            .iter()
            .filter(|(hook_key, _)| hook_key == key)
            .filter_map(|(_, hook)| hook(value))
            .collect();
        for (target, payload) in extra {
            self.inner.push_back(&target, payload).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FaultyStore {
    async fn hincr_many(&self, key: &str, deltas: &[(&str, i64)]) -> Result<(), StoreError> {
        self.inner.hincr_many(key, deltas).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.inner.hgetall(key).await
    }

    async fn push_front(&self, key: &str, value: String) -> Result<usize, StoreError> {
        self.check_push(key)?;
        let len = self.inner.push_front(key, value.clone()).await?;
        self.run_hooks(key, &value).await?;
        Ok(len)
    }

    async fn push_back(&self, key: &str, value: String) -> Result<usize, StoreError> {
        self.check_push(key)?;
        let len = self.inner.push_back(key, value.clone()).await?;
        self.run_hooks(key, &value).await?;
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.pop_front(key).await
    }

    async fn pop_back_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        self.inner.pop_back_blocking(key, timeout).await
    }

    async fn range(&self, key: &str, start: usize, count: usize) -> Result<Vec<String>, StoreError> {
        self.inner.range(key, start, count).await
    }

    async fn remove_at(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        self.inner.remove_at(key, index).await
    }

    async fn len(&self, key: &str) -> Result<usize, StoreError> {
        self.inner.len(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fault_window() {
        let store = FaultyStore::new().fail_pushes_after("dlq:", 1, 2);

        assert!(store.push_back("dlq:leads", "a".to_string()).await.is_ok());
        assert!(store.push_back("dlq:leads", "b".to_string()).await.is_err());
        assert!(store.push_front("dlq:poison", "c".to_string()).await.is_err());
        assert!(store.push_back("dlq:leads", "d".to_string()).await.is_ok());
        assert!(store.push_back("other", "e".to_string()).await.is_ok());

        assert_eq!(store.failed_pushes(), 2);
        assert_eq!(store.len("dlq:leads").await.unwrap(), 2);
        assert_eq!(store.len("dlq:poison").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_hook_appends() {
        let store = FaultyStore::new().on_push("in", |v| Some(("out".to_string(), v.to_uppercase())));
        store.push_front("in", "x".to_string()).await.unwrap();

        assert_eq!(store.range("out", 0, 10).await.unwrap(), vec!["X".to_string()]);
    }
}
