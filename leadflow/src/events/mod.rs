//! Progress events emitted while a lead moves through a route.
//!
//! The engine reports each step to an [`EventSink`]. Sinks must not block:
//! a slow consumer loses events rather than slowing enrichment down.

mod channel;
mod sink;

pub use channel::{ChannelEventSink, DeliveryMetrics};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::context::{StationOutcome, StopReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// The engine accepted a lead.
    #[serde(rename = "pipeline.started")]
    PipelineStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Route name.
        route: String,
        /// Stations in the route.
        stations: usize,
        /// Budget for the lead, in dollars.
        budget_limit: f64,
    },

    /// A station is about to be invoked.
    #[serde(rename = "station.started")]
    StationStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Station name.
        station: String,
        /// Position in the route.
        index: usize,
    },

    /// A station ran and the route may go on.
    #[serde(rename = "station.completed")]
    StationCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Station name.
        station: String,
        /// Dollars charged.
        cost: f64,
        /// Recorded outcome.
        outcome: StationOutcome,
        /// Wall time of the call.
        duration_ms: f64,
    },

    /// A station was not invoked.
    #[serde(rename = "station.skipped")]
    StationSkipped {
        /// Run identifier.
        run_id: Uuid,
        /// Station name.
        station: String,
        /// `contract_violation`, `budget_exceeded` or `deadline_exceeded`.
        outcome: StationOutcome,
        /// Human-readable detail.
        reason: String,
    },

    /// A station failed, errored or timed out.
    #[serde(rename = "station.failed")]
    StationFailed {
        /// Run identifier.
        run_id: Uuid,
        /// Station name.
        station: String,
        /// Dollars charged.
        cost: f64,
        /// Recorded outcome.
        outcome: StationOutcome,
        /// Error message.
        error: String,
    },

    /// The run is over.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Route name.
        route: String,
        /// Why it stopped.
        stop_reason: StopReason,
        /// Dollars spent.
        spent: f64,
        /// History length.
        stations_executed: usize,
    },
}

impl PipelineEvent {
    /// Returns the dotted event name, e.g. `station.completed`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::StationStarted { .. } => "station.started",
            Self::StationCompleted { .. } => "station.completed",
            Self::StationSkipped { .. } => "station.skipped",
            Self::StationFailed { .. } => "station.failed",
            Self::PipelineCompleted { .. } => "pipeline.completed",
        }
    }

    /// Returns the run the event belongs to.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        match self {
            Self::PipelineStarted { run_id, .. }
            | Self::StationStarted { run_id, .. }
            | Self::StationCompleted { run_id, .. }
            | Self::StationSkipped { run_id, .. }
            | Self::StationFailed { run_id, .. }
            | Self::PipelineCompleted { run_id, .. } => *run_id,
        }
    }
}
