//! The result of one pipeline run.

use crate::context::{
    to_dollars, HistoryEntry, LeadRecord, PipelineContext, StationOutcome, StopReason,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// Where a lead ends up after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every station was reached.
    Enriched,
    /// The route ended early by design (a gate said stop, or money ran out).
    SkippedEarly,
    /// The lead failed and belongs in the DLQ.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enriched => write!(f, "enriched"),
            Self::SkippedEarly => write!(f, "skipped_early"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Enriched data plus the full audit trail of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub run_id: Uuid,
    /// Route the lead ran through.
    pub route: String,
    /// Final record, annotated with `_pipeline_*` fields.
    pub data: LeadRecord,
    /// Every station the engine reached, in order.
    pub history: Vec<HistoryEntry>,
    /// Dollars spent.
    pub spent: f64,
    /// Budget ceiling.
    pub budget_limit: f64,
    /// Why the run stopped.
    pub stop_reason: StopReason,
}

impl PipelineRun {
    pub(crate) fn from_context(ctx: PipelineContext) -> Self {
        let run_id = ctx.run_id();
        let route = ctx.route().to_string();
        let (mut data, history, spent_micros, budget_micros, stop_reason) = ctx.into_parts();
        let stop_reason = stop_reason.unwrap_or(StopReason::Completed);
        let spent = to_dollars(spent_micros);
        let errors = history
            .iter()
            .filter(|e| e.outcome == StationOutcome::Error)
            .count();

        data.insert("_pipeline_cost".to_string(), json!(spent));
        data.insert("_pipeline_stations_executed".to_string(), json!(history.len()));
        data.insert("_pipeline_errors".to_string(), json!(errors));
        data.insert("_pipeline_stop_reason".to_string(), json!(stop_reason));

        Self {
            run_id,
            route,
            data,
            history,
            spent,
            budget_limit: to_dollars(budget_micros),
            stop_reason,
        }
    }

    /// True when the lead should go to the DLQ.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.stop_reason.is_failure()
    }

    /// Maps the stop reason onto the lead lifecycle.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        match self.stop_reason {
            StopReason::Completed => RunStatus::Enriched,
            StopReason::SkipRemaining | StopReason::BudgetExceeded => RunStatus::SkippedEarly,
            StopReason::Fail | StopReason::Timeout => RunStatus::Failed,
        }
    }

    /// Names of the stations that were actually invoked, in order.
    #[must_use]
    pub fn path(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter(|e| e.outcome.was_invoked())
            .map(|e| e.station.as_str())
            .collect()
    }

    /// Sum of the history costs. Equals `spent`.
    #[must_use]
    pub fn history_cost(&self) -> f64 {
        let micros: u64 = self
            .history
            .iter()
            .map(|e| crate::context::cost_to_micros(e.cost))
            .sum();
        to_dollars(micros)
    }

    /// The message to file with the DLQ entry: the last recorded error, or
    /// the stop reason when no station reported one.
    #[must_use]
    pub fn failure_message(&self) -> String {
        self.history
            .iter()
            .rev()
            .find_map(|e| {
                e.error
                    .as_ref()
                    .filter(|_| e.outcome != StationOutcome::ContractViolation)
                    .map(|err| format!("{}: {err}", e.station))
            })
            .unwrap_or_else(|| format!("pipeline stopped: {}", self.stop_reason))
    }

    /// Summary for logs and the admin surface.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "run_id": self.run_id,
            "route": self.route,
            "status": self.status(),
            "stop_reason": self.stop_reason,
            "spent": self.spent,
            "budget_limit": self.budget_limit,
            "path": self.path(),
        })
    }
}
