//! The ingestion queue workers consume leads from.
//!
//! Producers `push` JSON lead objects onto the head of a store list and
//! workers block-pop from the tail, so leads are consumed in FIFO order.
//! A lead may name its route in the `_route` field.

use crate::context::LeadRecord;
use crate::errors::StoreError;
use crate::store::SharedStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Field naming the route a lead should run through.
pub const ROUTE_FIELD: &str = "_route";

fn default_queue_key() -> String {
    "leads_to_enrich".to_string()
}

fn default_pop_timeout_secs() -> u64 {
    5
}

/// Ingestion queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Store list holding pending leads.
    #[serde(default = "default_queue_key")]
    pub key: String,
    /// How long a worker blocks on an empty queue before checking for
    /// shutdown.
    #[serde(default = "default_pop_timeout_secs")]
    pub pop_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key: default_queue_key(),
            pop_timeout_secs: default_pop_timeout_secs(),
        }
    }
}

impl QueueConfig {
    /// The pop timeout as a duration, at least one second.
    #[must_use]
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_secs.max(1))
    }
}

/// One item taken off the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A well-formed lead.
    Lead(LeadRecord),
    /// A payload that is not a JSON object. Kept so it can be quarantined.
    Malformed {
        /// The payload as received.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Handle on the ingestion queue.
#[derive(Debug, Clone)]
pub struct LeadQueue {
    store: Arc<dyn SharedStore>,
    key: String,
}

impl LeadQueue {
    /// Creates a handle on the list at `key`.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The store key of the queue.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Enqueues a lead. Returns the queue length after the push.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the push.
    pub async fn push(&self, lead: &LeadRecord) -> Result<usize, StoreError> {
        let payload = serde_json::to_string(lead).map_err(|e| StoreError::Corrupt {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        self.store.push_front(&self.key, payload).await
    }

    /// Enqueues a lead for a specific route.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the push.
    pub async fn push_for_route(&self, mut lead: LeadRecord, route: &str) -> Result<usize, StoreError> {
        lead.insert(ROUTE_FIELD.to_string(), serde_json::Value::String(route.to_string()));
        self.push(&lead).await
    }

    /// Returns a payload to the consuming end, so it is the next one popped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the push.
    pub async fn requeue_raw(&self, payload: String) -> Result<usize, StoreError> {
        self.store.push_back(&self.key, payload).await
    }

    /// Takes the oldest lead, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<Delivery>, StoreError> {
        let Some(raw) = self.store.pop_back_blocking(&self.key, timeout).await? else {
            return Ok(None);
        };
        let delivery = match serde_json::from_str::<LeadRecord>(&raw) {
            Ok(lead) => Delivery::Lead(lead),
            Err(e) => Delivery::Malformed {
                raw,
                reason: e.to_string(),
            },
        };
        Ok(Some(delivery))
    }

    /// Number of leads waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len(&self.key).await
    }
}
