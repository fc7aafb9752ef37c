//! The mutable per-lead context the engine threads through a route.

use super::history::{HistoryEntry, StopReason};
use super::money::{budget_to_micros, cost_to_micros, to_dollars};
use super::record::{has_field, LeadRecord};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-lead execution state.
///
/// Created fresh for each lead and never shared across workers, so it needs
/// no locking. Stations receive it by shared reference and return new fields
/// instead of mutating it; only the engine writes.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    run_id: Uuid,
    route: String,
    data: LeadRecord,
    budget_micros: u64,
    spent_micros: u64,
    history: Vec<HistoryEntry>,
    stop_reason: Option<StopReason>,
    deadline: Option<Instant>,
}

impl PipelineContext {
    /// Creates a context for one lead with a dollar budget.
    #[must_use]
    pub fn new(data: LeadRecord, budget_limit: f64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            route: String::new(),
            data,
            budget_micros: budget_to_micros(budget_limit),
            spent_micros: 0,
            history: Vec::new(),
            stop_reason: None,
            deadline: None,
        }
    }

    /// Sets the route name, for logging.
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Sets an absolute deadline for the whole run.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the route name.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Returns the lead's current fields.
    #[must_use]
    pub fn data(&self) -> &LeadRecord {
        &self.data
    }

    /// Gets a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Gets a field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Returns true if the field is present and not null.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        has_field(&self.data, key)
    }

    /// Returns the budget ceiling in dollars.
    #[must_use]
    pub fn budget_limit(&self) -> f64 {
        to_dollars(self.budget_micros)
    }

    /// Returns the dollars spent so far.
    #[must_use]
    pub fn spent(&self) -> f64 {
        to_dollars(self.spent_micros)
    }

    /// Returns the dollars left before the ceiling.
    #[must_use]
    pub fn remaining(&self) -> f64 {
        to_dollars(self.budget_micros.saturating_sub(self.spent_micros))
    }

    /// Returns true if a station costing `cost` dollars fits in the budget.
    #[must_use]
    pub fn can_afford(&self, cost: f64) -> bool {
        self.spent_micros.saturating_add(cost_to_micros(cost)) <= self.budget_micros
    }

    /// Returns the history recorded so far.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Returns why the run stopped, if it has.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Returns true once a stop reason is set.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Returns the run deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline. `None` means no deadline.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Merges station output into the record, last write wins.
    pub(crate) fn merge(&mut self, fields: LeadRecord) {
        for (key, value) in fields {
            self.data.insert(key, value);
        }
    }

    /// Charges a station's cost.
    pub(crate) fn charge(&mut self, cost: f64) {
        self.spent_micros = self.spent_micros.saturating_add(cost_to_micros(cost));
    }

    /// Appends a history entry.
    pub(crate) fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Sets the stop reason. The first reason wins.
    pub(crate) fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }

    /// Consumes the context into its parts.
    pub(crate) fn into_parts(self) -> (LeadRecord, Vec<HistoryEntry>, u64, u64, Option<StopReason>) {
        (
            self.data,
            self.history,
            self.spent_micros,
            self.budget_micros,
            self.stop_reason,
        )
    }
}
