//! Station trait and implementations.
//!
//! A station is one enrichment step: it declares what it needs, what it
//! produces and what it costs, and the engine decides whether it runs.

mod builtin;
mod provider;

pub use builtin::{FnStation, IdentityStation, NoOpStation};
pub use provider::{ProviderClient, ProviderFallbackStation, ProviderResponse};

#[cfg(test)]
pub use provider::MockProviderClient;

use crate::context::{LeadRecord, PipelineContext};
use crate::errors::StationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Debug};
use std::time::Duration;

/// Control signal returned by a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Run the next station.
    #[default]
    Continue,
    /// The lead is done; nothing else should run.
    SkipRemaining,
    /// The lead cannot be enriched.
    Fail,
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::SkipRemaining => write!(f, "skip_remaining"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// What a station declares about itself. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationContract {
    /// Unique within a route.
    pub name: String,
    /// Fields that must be available before the station may run.
    pub required_inputs: BTreeSet<String>,
    /// Fields the station may write.
    pub produces_outputs: BTreeSet<String>,
    /// Dollars charged whenever the station is invoked.
    pub cost_estimate: f64,
}

impl StationContract {
    /// Creates a free contract with no inputs or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_inputs: BTreeSet::new(),
            produces_outputs: BTreeSet::new(),
            cost_estimate: 0.0,
        }
    }

    /// Adds required input fields.
    #[must_use]
    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds produced output fields.
    #[must_use]
    pub fn produces<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces_outputs.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Sets the per-invocation cost. Negative or non-finite values become 0.
    #[must_use]
    pub fn cost(mut self, dollars: f64) -> Self {
        if dollars.is_finite() && dollars >= 0.0 {
            self.cost_estimate = dollars;
        } else {
            tracing::warn!(
                station = %self.name,
                cost = dollars,
                "Invalid cost estimate, clamping to 0"
            );
            self.cost_estimate = 0.0;
        }
        self
    }

    /// Returns the keys of `fields` this contract does not declare.
    #[must_use]
    pub fn undeclared_outputs(&self, fields: &LeadRecord) -> Vec<String> {
        fields
            .keys()
            .filter(|k| !self.produces_outputs.contains(k.as_str()))
            .cloned()
            .collect()
    }
}

/// Result of a station's `process` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationOutput {
    /// Fields to merge into the lead.
    pub fields: LeadRecord,
    /// What the engine should do next.
    pub condition: StopCondition,
    /// Human-readable reason, recorded in history for `Fail`.
    pub reason: Option<String>,
}

impl StationOutput {
    /// Continue with the given fields.
    #[must_use]
    pub fn proceed(fields: LeadRecord) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    /// Continue without writing anything.
    #[must_use]
    pub fn proceed_empty() -> Self {
        Self::default()
    }

    /// Write `fields`, then stop the route early.
    #[must_use]
    pub fn skip_remaining(fields: LeadRecord, reason: impl Into<String>) -> Self {
        Self {
            fields,
            condition: StopCondition::SkipRemaining,
            reason: Some(reason.into()),
        }
    }

    /// Fail the lead.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            fields: LeadRecord::new(),
            condition: StopCondition::Fail,
            reason: Some(reason.into()),
        }
    }

    /// Sets a single field, keeping the condition.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Trait for enrichment stations.
///
/// `process` receives a read-only view of the lead; the engine merges the
/// returned fields. An `Err` fails the lead and sends it to the DLQ.
#[async_trait]
pub trait Station: Send + Sync + Debug {
    /// Returns the station's contract.
    fn contract(&self) -> &StationContract;

    /// Returns the station name.
    fn name(&self) -> &str {
        &self.contract().name
    }

    /// Per-call timeout; `None` uses the engine default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether hitting the timeout fails the lead. When false the timeout is
    /// recorded and the route continues.
    fn timeout_is_fatal(&self) -> bool {
        true
    }

    /// Does the station's work.
    async fn process(&self, ctx: &PipelineContext) -> Result<StationOutput, StationError>;
}
