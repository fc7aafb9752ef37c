//! Per-lead execution state.
//!
//! This module provides:
//! - The schema-less `LeadRecord`
//! - The mutable `PipelineContext` carried through a route
//! - The append-only history and stop reasons

mod execution;
mod history;
mod money;
mod record;

pub use execution::PipelineContext;
pub use history::{HistoryEntry, StationOutcome, StopReason};
pub use money::{budget_to_micros, cost_to_micros, to_dollars, to_micros};
pub use record::{
    has_field, missing_fields, record_from, retry_count, strip_pipeline_fields, LeadRecord,
    PIPELINE_FIELD_PREFIX, RETRY_COUNT_FIELD,
};
