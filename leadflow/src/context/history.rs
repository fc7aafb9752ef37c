//! The append-only execution history of one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened when the engine reached a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationOutcome {
    /// The station ran and asked to continue.
    Continue,
    /// The station ran and ended the route early, successfully.
    SkipRemaining,
    /// The station ran and failed the lead.
    Fail,
    /// The station was skipped because its inputs were missing.
    ContractViolation,
    /// The station was not invoked because it would overrun the budget.
    BudgetExceeded,
    /// The station raised an error, panicked, or timed out.
    Error,
    /// The lead's deadline passed before or during the station.
    DeadlineExceeded,
}

impl fmt::Display for StationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::SkipRemaining => write!(f, "skip_remaining"),
            Self::Fail => write!(f, "fail"),
            Self::ContractViolation => write!(f, "contract_violation"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::Error => write!(f, "error"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

impl StationOutcome {
    /// Returns true if the station's `process` was actually invoked.
    #[must_use]
    pub fn was_invoked(&self) -> bool {
        matches!(
            self,
            Self::Continue | Self::SkipRemaining | Self::Fail | Self::Error
        )
    }
}

/// One record in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Station name.
    pub station: String,
    /// Dollars charged for this entry (zero for stations never invoked).
    pub cost: f64,
    /// What happened.
    pub outcome: StationOutcome,
    /// Error or skip detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time spent in `process`, if it was invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl HistoryEntry {
    /// Creates a new entry stamped with the current time.
    #[must_use]
    pub fn new(station: impl Into<String>, cost: f64, outcome: StationOutcome) -> Self {
        Self {
            station: station.into(),
            cost,
            outcome,
            error: None,
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    /// Attaches an error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches the station's duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Why a run stopped. Set once per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every station in the route was reached.
    Completed,
    /// A station returned `SkipRemaining`.
    SkipRemaining,
    /// The next station would have overrun the budget.
    BudgetExceeded,
    /// A station failed or raised an error.
    Fail,
    /// The lead's deadline passed.
    Timeout,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::SkipRemaining => write!(f, "skip_remaining"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::Fail => write!(f, "fail"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl StopReason {
    /// Returns true if the lead must go to the dead-letter queue.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::Timeout)
    }
}
