//! The pipeline engine.

use super::PipelineRun;
use crate::context::{missing_fields, HistoryEntry, LeadRecord, PipelineContext, StationOutcome, StopReason};
use crate::errors::StationError;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::routes::Route;
use crate::stations::{Station, StationOutput, StopCondition};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

fn default_station_timeout_secs() -> f64 {
    30.0
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for stations that do not set their own.
    #[serde(default = "default_station_timeout_secs")]
    pub default_station_timeout_secs: f64,
    /// Wall-clock limit for a whole lead. Unset means no limit.
    #[serde(default)]
    pub lead_deadline_secs: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_station_timeout_secs: default_station_timeout_secs(),
            lead_deadline_secs: None,
        }
    }
}

fn secs(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok().filter(|d| !d.is_zero())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// How one station invocation ended.
enum Invocation {
    Returned(StationOutput),
    Errored(String),
    TimedOut(Duration),
    DeadlineHit,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs leads through routes.
///
/// The engine holds no per-lead state, so one instance can serve many
/// concurrent runs.
#[derive(Clone)]
pub struct PipelineEngine {
    sink: Arc<dyn EventSink>,
    default_timeout: Duration,
    lead_deadline: Option<Duration>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("default_timeout", &self.default_timeout)
            .field("lead_deadline", &self.lead_deadline)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineEngine {
    /// Creates an engine with a 30s station timeout, no lead deadline and
    /// no event sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Arc::new(NoOpEventSink),
            default_timeout: Duration::from_secs(30),
            lead_deadline: None,
        }
    }

    /// Creates an engine from settings. Invalid durations fall back to the
    /// defaults with a warning.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut engine = Self::new();
        match secs(config.default_station_timeout_secs) {
            Some(timeout) => engine.default_timeout = timeout,
            None => tracing::warn!(
                value = config.default_station_timeout_secs,
                "Invalid default station timeout, keeping 30s"
            ),
        }
        if let Some(raw) = config.lead_deadline_secs {
            engine.lead_deadline = secs(raw);
            if engine.lead_deadline.is_none() {
                tracing::warn!(value = raw, "Invalid lead deadline, running without one");
            }
        }
        engine
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the timeout for stations that do not set their own.
    #[must_use]
    pub const fn with_default_station_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the per-lead deadline applied by [`run`](Self::run).
    #[must_use]
    pub const fn with_lead_deadline(mut self, deadline: Duration) -> Self {
        self.lead_deadline = Some(deadline);
        self
    }

    /// Runs `initial` through `route` under the route's budget.
    pub async fn run(&self, initial: LeadRecord, route: &Route) -> PipelineRun {
        let mut ctx = PipelineContext::new(initial, route.budget_limit()).with_route(route.name());
        if let Some(deadline) = self.lead_deadline {
            ctx = ctx.with_timeout(deadline);
        }
        self.run_context(ctx, route).await
    }

    /// Runs a prepared context through `route`. The context's own budget
    /// and deadline apply.
    pub async fn run_context(&self, ctx: PipelineContext, route: &Route) -> PipelineRun {
        let span = tracing::info_span!(
            "pipeline",
            run_id = %ctx.run_id(),
            route = %route.name()
        );
        self.drive(ctx, route).instrument(span).await
    }

    async fn drive(&self, mut ctx: PipelineContext, route: &Route) -> PipelineRun {
        let run_id = ctx.run_id();
        tracing::info!(
            stations = route.len(),
            budget = ctx.budget_limit(),
            "Pipeline started"
        );
        self.sink.emit(&PipelineEvent::PipelineStarted {
            run_id,
            route: route.name().to_string(),
            stations: route.len(),
            budget_limit: ctx.budget_limit(),
        });

        for (index, station) in route.stations().iter().enumerate() {
            if ctx.is_stopped() {
                break;
            }
            self.step(&mut ctx, index, station.as_ref()).await;
        }
        ctx.stop(StopReason::Completed);

        let run = PipelineRun::from_context(ctx);
        tracing::info!(
            stop_reason = %run.stop_reason,
            spent = run.spent,
            stations_executed = run.history.len(),
            "Pipeline finished"
        );
        self.sink.emit(&PipelineEvent::PipelineCompleted {
            run_id,
            route: run.route.clone(),
            stop_reason: run.stop_reason,
            spent: run.spent,
            stations_executed: run.history.len(),
        });
        run
    }

    fn skip(&self, ctx: &mut PipelineContext, station: &str, outcome: StationOutcome, reason: String) {
        self.sink.emit(&PipelineEvent::StationSkipped {
            run_id: ctx.run_id(),
            station: station.to_string(),
            outcome,
            reason: reason.clone(),
        });
        ctx.record(HistoryEntry::new(station, 0.0, outcome).with_error(reason));
    }

    async fn step(&self, ctx: &mut PipelineContext, index: usize, station: &dyn Station) {
        let contract = station.contract();
        let name = contract.name.as_str();

        if ctx.deadline_passed() {
            tracing::warn!(station = %name, "Lead deadline passed, stopping");
            self.skip(
                ctx,
                name,
                StationOutcome::DeadlineExceeded,
                "lead deadline passed before station".to_string(),
            );
            ctx.stop(StopReason::Timeout);
            return;
        }

        let missing = missing_fields(ctx.data(), &contract.required_inputs);
        if !missing.is_empty() {
            tracing::warn!(
                station = %name,
                missing = ?missing,
                "Contract violation, skipping station"
            );
            let reason = format!("missing required inputs: {}", missing.join(", "));
            self.skip(ctx, name, StationOutcome::ContractViolation, reason);
            return;
        }

        let cost = contract.cost_estimate;
        if !ctx.can_afford(cost) {
            tracing::info!(
                station = %name,
                cost,
                remaining = ctx.remaining(),
                "Budget exceeded, stopping"
            );
            let reason = format!(
                "cost ${cost:.2} exceeds remaining budget ${:.2}",
                ctx.remaining()
            );
            self.skip(ctx, name, StationOutcome::BudgetExceeded, reason);
            ctx.stop(StopReason::BudgetExceeded);
            return;
        }

        self.sink.emit(&PipelineEvent::StationStarted {
            run_id: ctx.run_id(),
            station: name.to_string(),
            index,
        });
        let started = Instant::now();
        let invocation = self.invoke(station, ctx).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        ctx.charge(cost);

        match invocation {
            Invocation::Returned(output) => self.apply(ctx, station, output, cost, duration_ms),
            Invocation::Errored(error) => {
                tracing::error!(station = %name, error = %error, "Station raised an error");
                self.fail(ctx, name, cost, duration_ms, StationOutcome::Error, error);
                ctx.stop(StopReason::Fail);
            }
            Invocation::TimedOut(after) => {
                let error = StationError::timeout(name, after).to_string();
                if station.timeout_is_fatal() {
                    tracing::error!(station = %name, timeout_ms = millis(after), "Station timed out");
                    self.fail(ctx, name, cost, duration_ms, StationOutcome::Error, error);
                    ctx.stop(StopReason::Fail);
                } else {
                    tracing::warn!(
                        station = %name,
                        timeout_ms = millis(after),
                        "Station timed out, continuing"
                    );
                    self.fail(ctx, name, cost, duration_ms, StationOutcome::Error, error);
                }
            }
            Invocation::DeadlineHit => {
                tracing::warn!(station = %name, "Lead deadline passed during station");
                self.fail(
                    ctx,
                    name,
                    cost,
                    duration_ms,
                    StationOutcome::DeadlineExceeded,
                    "lead deadline passed during station".to_string(),
                );
                ctx.stop(StopReason::Timeout);
            }
        }
    }

    async fn invoke(&self, station: &dyn Station, ctx: &PipelineContext) -> Invocation {
        let station_timeout = station.timeout().unwrap_or(self.default_timeout);
        let (limit, deadline_bound) = match ctx.time_remaining() {
            Some(left) if left < station_timeout => (left, true),
            _ => (station_timeout, false),
        };

        let call = AssertUnwindSafe(station.process(ctx)).catch_unwind();
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(Ok(output))) => Invocation::Returned(output),
            Ok(Ok(Err(e))) => Invocation::Errored(format!("{}: {e}", e.kind())),
            Ok(Err(payload)) => {
                Invocation::Errored(format!("panic: {}", panic_message(payload.as_ref())))
            }
            Err(_) if deadline_bound => Invocation::DeadlineHit,
            Err(_) => Invocation::TimedOut(station_timeout),
        }
    }

    fn apply(
        &self,
        ctx: &mut PipelineContext,
        station: &dyn Station,
        output: StationOutput,
        cost: f64,
        duration_ms: f64,
    ) {
        let contract = station.contract();
        let name = contract.name.as_str();

        let undeclared = contract.undeclared_outputs(&output.fields);
        if !undeclared.is_empty() {
            tracing::warn!(
                station = %name,
                fields = ?undeclared,
                "Station wrote fields outside its contract"
            );
        }
        ctx.merge(output.fields);

        match output.condition {
            StopCondition::Continue | StopCondition::SkipRemaining => {
                let outcome = if output.condition == StopCondition::Continue {
                    StationOutcome::Continue
                } else {
                    StationOutcome::SkipRemaining
                };
                ctx.record(HistoryEntry::new(name, cost, outcome).with_duration_ms(duration_ms));
                self.sink.emit(&PipelineEvent::StationCompleted {
                    run_id: ctx.run_id(),
                    station: name.to_string(),
                    cost,
                    outcome,
                    duration_ms,
                });
                if outcome == StationOutcome::SkipRemaining {
                    tracing::info!(
                        station = %name,
                        reason = output.reason.as_deref().unwrap_or(""),
                        "Station ended the route early"
                    );
                    ctx.stop(StopReason::SkipRemaining);
                } else {
                    tracing::debug!(station = %name, cost, "Station completed");
                }
            }
            StopCondition::Fail => {
                let reason = output
                    .reason
                    .unwrap_or_else(|| "station returned fail".to_string());
                tracing::warn!(station = %name, reason = %reason, "Station failed the lead");
                self.fail(ctx, name, cost, duration_ms, StationOutcome::Fail, reason);
                ctx.stop(StopReason::Fail);
            }
        }
    }

    fn fail(
        &self,
        ctx: &mut PipelineContext,
        station: &str,
        cost: f64,
        duration_ms: f64,
        outcome: StationOutcome,
        error: String,
    ) {
        self.sink.emit(&PipelineEvent::StationFailed {
            run_id: ctx.run_id(),
            station: station.to_string(),
            cost,
            outcome,
            error: error.clone(),
        });
        ctx.record(
            HistoryEntry::new(station, cost, outcome)
                .with_error(error)
                .with_duration_ms(duration_ms),
        );
    }

    /// Renders a route as text: station order, contracts, costs and the
    /// worst-case spend against the budget.
    #[must_use]
    pub fn describe(route: &Route) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Route '{}' (budget ${:.2}, {} stations)",
            route.name(),
            route.budget_limit(),
            route.len()
        );

        let mut total = 0.0;
        for (i, station) in route.stations().iter().enumerate() {
            let contract = station.contract();
            total += contract.cost_estimate;
            let join = |set: &std::collections::BTreeSet<String>| {
                set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
            };
            let _ = writeln!(
                out,
                "  {:>2}. {:<28} ${:.2}  [{}] -> [{}]",
                i + 1,
                contract.name,
                contract.cost_estimate,
                join(&contract.required_inputs),
                join(&contract.produces_outputs)
            );
        }

        let verdict = if total <= route.budget_limit() {
            "fits"
        } else {
            "exceeds budget"
        };
        let _ = write!(out, "  max spend ${total:.2} ({verdict})");
        out
    }
}
