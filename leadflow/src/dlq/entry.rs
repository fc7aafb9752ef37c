//! DLQ records.

use crate::context::LeadRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One failed lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Stable identifier, time-ordered.
    pub id: Uuid,
    /// The lead as it stood when it failed, without `_pipeline_*` fields.
    pub lead_snapshot: LeadRecord,
    /// What went wrong.
    pub error_message: String,
    /// When it failed.
    pub failed_at: DateTime<Utc>,
    /// Route the lead was running.
    pub original_route: String,
    /// How many times the lead had already been retried from the DLQ.
    pub retry_count: u32,
}

impl DlqEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(
        lead_snapshot: LeadRecord,
        error_message: impl Into<String>,
        original_route: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            lead_snapshot,
            error_message: error_message.into(),
            failed_at: Utc::now(),
            original_route: original_route.into(),
            retry_count,
        }
    }
}

/// Where [`DeadLetterQueue::push`](super::DeadLetterQueue::push) put a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for retry.
    Queued(Uuid),
    /// Out of retries; moved to the poison list.
    Poisoned(Uuid),
}

impl PushOutcome {
    /// The entry id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Queued(id) | Self::Poisoned(id) => *id,
        }
    }
}

/// Result of [`DeadLetterQueue::retry_all`](super::DeadLetterQueue::retry_all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAllReport {
    /// Entries republished to the ingestion queue.
    pub retried: usize,
    /// Entries still in the DLQ afterwards.
    pub remaining: usize,
    /// Entries that could not be processed.
    pub errors: usize,
}
