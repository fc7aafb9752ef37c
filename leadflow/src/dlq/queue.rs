//! The dead-letter queue over the shared store.

use super::{DlqCommand, DlqEntry, PushOutcome, RetryAllReport};
use crate::context::{retry_count, strip_pipeline_fields, LeadRecord, RETRY_COUNT_FIELD};
use crate::errors::DlqError;
use crate::queue::{LeadQueue, ROUTE_FIELD};
use crate::store::SharedStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

fn default_dlq_key() -> String {
    "dlq:leads".to_string()
}

fn default_poison_key() -> String {
    "dlq:poison".to_string()
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

/// DLQ settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Store list holding retryable entries.
    #[serde(default = "default_dlq_key")]
    pub key: String,
    /// Store list holding entries that will not be retried.
    #[serde(default = "default_poison_key")]
    pub poison_key: String,
    /// Entries kept before the oldest are moved to the poison list.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Retries a lead gets before a further failure poisons it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            key: default_dlq_key(),
            poison_key: default_poison_key(),
            max_entries: default_max_entries(),
            max_retries: default_max_retries(),
        }
    }
}

/// Failed leads awaiting retry.
///
/// Index 0 is always the oldest entry. Entries are republished onto the
/// ingestion queue with their retry count bumped and their route attached.
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    store: Arc<dyn SharedStore>,
    queue: LeadQueue,
    config: DlqConfig,
}

impl DeadLetterQueue {
    /// Creates a DLQ that republishes onto `queue`.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, queue: LeadQueue, config: DlqConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &DlqConfig {
        &self.config
    }

    fn encode(entry: &DlqEntry) -> Result<String, DlqError> {
        Ok(serde_json::to_string(entry)?)
    }

    fn decode(raw: &str) -> Result<DlqEntry, DlqError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Records a failed lead.
    ///
    /// Leads already retried `max_retries` times go straight to the poison
    /// list. If the DLQ grows past `max_entries`, the oldest entries are
    /// moved to the poison list.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn push(
        &self,
        lead_snapshot: &LeadRecord,
        error: &str,
        original_route: &str,
    ) -> Result<PushOutcome, DlqError> {
        let retries = retry_count(lead_snapshot);
        let entry = DlqEntry::new(
            strip_pipeline_fields(lead_snapshot),
            error,
            original_route,
            retries,
        );
        let id = entry.id;
        let payload = Self::encode(&entry)?;

        if retries >= self.config.max_retries {
            tracing::warn!(
                entry_id = %id,
                route = %original_route,
                retries,
                error = %error,
                "Lead exhausted its retries, moving to poison list"
            );
            self.store.push_back(&self.config.poison_key, payload).await?;
            return Ok(PushOutcome::Poisoned(id));
        }

        let len = self.store.push_back(&self.config.key, payload).await?;
        tracing::info!(
            entry_id = %id,
            route = %original_route,
            error = %error,
            dlq_len = len,
            "Lead sent to DLQ"
        );
        self.enforce_cap(len).await?;
        Ok(PushOutcome::Queued(id))
    }

    async fn enforce_cap(&self, mut len: usize) -> Result<(), DlqError> {
        while len > self.config.max_entries {
            let Some(oldest) = self.store.pop_front(&self.config.key).await? else {
                break;
            };
            tracing::warn!(
                max_entries = self.config.max_entries,
                "DLQ full, moving oldest entry to poison list"
            );
            self.store.push_back(&self.config.poison_key, oldest).await?;
            len -= 1;
        }
        Ok(())
    }

    /// Quarantines a payload that could not be parsed as a lead.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn quarantine_raw(&self, raw: &str, reason: &str) -> Result<PushOutcome, DlqError> {
        let mut snapshot = LeadRecord::new();
        snapshot.insert("_raw_payload".to_string(), Value::String(raw.to_string()));
        let entry = DlqEntry::new(snapshot, reason, "", 0);
        let id = entry.id;
        self.store
            .push_back(&self.config.poison_key, Self::encode(&entry)?)
            .await?;
        tracing::warn!(entry_id = %id, reason = %reason, "Malformed lead quarantined");
        Ok(PushOutcome::Poisoned(id))
    }

    async fn read(&self, key: &str, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        self.store
            .range(key, 0, limit)
            .await?
            .iter()
            .map(|raw| Self::decode(raw))
            .collect()
    }

    /// Returns up to `limit` entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or an entry is corrupt.
    pub async fn list(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        self.read(&self.config.key, limit).await
    }

    /// Returns up to `limit` poisoned entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or an entry is corrupt.
    pub async fn list_poison(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        self.read(&self.config.poison_key, limit).await
    }

    /// Number of retryable entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn len(&self) -> Result<usize, DlqError> {
        Ok(self.store.len(&self.config.key).await?)
    }

    async fn republish(&self, entry: &DlqEntry) -> Result<(), DlqError> {
        let mut lead = entry.lead_snapshot.clone();
        lead.insert(RETRY_COUNT_FIELD.to_string(), json!(entry.retry_count + 1));
        if !entry.original_route.is_empty() {
            lead.insert(ROUTE_FIELD.to_string(), json!(entry.original_route));
        }
        self.queue.push(&lead).await?;
        Ok(())
    }

    /// Removes the entry at `index` and republishes it.
    ///
    /// The removal is atomic, so two operators retrying the same index
    /// republish it once; the second gets [`DlqError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::NotFound`] for an index past the end, or an error
    /// if the store fails. A failed republish puts the entry back at the
    /// head of the DLQ (index 0), not at `index`, so indexes seen before the
    /// call no longer hold.
    pub async fn retry_one(&self, index: usize) -> Result<DlqEntry, DlqError> {
        let raw = self
            .store
            .remove_at(&self.config.key, index)
            .await?
            .ok_or(DlqError::NotFound { index })?;

        let entry = match Self::decode(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                self.store.push_back(&self.config.poison_key, raw).await?;
                return Err(e);
            }
        };

        if let Err(e) = self.republish(&entry).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Republish failed, restoring entry");
            self.store.push_front(&self.config.key, raw).await?;
            return Err(e);
        }

        tracing::info!(
            entry_id = %entry.id,
            route = %entry.original_route,
            retry = entry.retry_count + 1,
            "DLQ entry retried"
        );
        Ok(entry)
    }

    /// Republishes every entry present when the call starts, oldest first.
    ///
    /// Entries filed while the drain runs (including leads it republished
    /// that failed again) are left for the next call. Stops at the first
    /// republish failure, putting that entry back at the head; entries
    /// already republished stay removed. Corrupt entries are moved to the
    /// poison list and counted as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails outside a republish.
    pub async fn retry_all(&self) -> Result<RetryAllReport, DlqError> {
        let mut report = RetryAllReport::default();
        let snapshot_len = self.len().await?;

        for _ in 0..snapshot_len {
            let Some(raw) = self.store.pop_front(&self.config.key).await? else {
                break;
            };
            let entry = match Self::decode(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Corrupt DLQ entry moved to poison list");
                    self.store.push_back(&self.config.poison_key, raw).await?;
                    report.errors += 1;
                    continue;
                }
            };

            if let Err(e) = self.republish(&entry).await {
                tracing::error!(entry_id = %entry.id, error = %e, "Republish failed, stopping retry_all");
                self.store.push_front(&self.config.key, raw).await?;
                report.errors += 1;
                break;
            }
            report.retried += 1;
        }

        report.remaining = self.len().await?;
        tracing::info!(
            retried = report.retried,
            remaining = report.remaining,
            errors = report.errors,
            "DLQ retry_all finished"
        );
        Ok(report)
    }

    /// Executes an admin command and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying operation.
    pub async fn handle(&self, command: DlqCommand) -> Result<Value, DlqError> {
        match command {
            DlqCommand::RetryOne { index } => {
                let entry = self.retry_one(index).await?;
                Ok(json!({
                    "status": "ok",
                    "retried": 1,
                    "id": entry.id,
                }))
            }
            DlqCommand::RetryAll => {
                let report = self.retry_all().await?;
                Ok(json!({
                    "status": "ok",
                    "retried": report.retried,
                    "remaining": report.remaining,
                    "errors": report.errors,
                }))
            }
        }
    }
}
