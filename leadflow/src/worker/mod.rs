//! Queue consumers.
//!
//! A [`Worker`] pops leads from the ingestion queue, resolves their route,
//! runs them through the engine and files failures in the DLQ. A
//! [`WorkerPool`] runs several workers as independent tokio tasks sharing one
//! [`CancellationToken`].

mod cancel;

pub use cancel::CancellationToken;

use crate::context::{strip_pipeline_fields, LeadRecord};
use crate::dlq::{DeadLetterQueue, PushOutcome};
use crate::engine::{PipelineEngine, RunStatus};
use crate::errors::{DlqError, LeadflowError};
use crate::queue::{Delivery, LeadQueue, ROUTE_FIELD};
use crate::retry::{Backoff, RetryPolicy};
use crate::routes::RouteRegistry;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadDisposition {
    /// The route ran to the end.
    Enriched,
    /// The route ended early by design.
    SkippedEarly,
    /// The lead failed and was filed in the DLQ (or its poison list).
    DeadLettered(PushOutcome),
    /// The payload was not a lead and went to the poison list.
    Quarantined,
    /// The DLQ was unreachable at shutdown, so the lead went back onto the
    /// ingestion queue.
    Requeued,
}

/// Counters shared by every worker in a pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    enriched: AtomicU64,
    skipped: AtomicU64,
    dead_lettered: AtomicU64,
    quarantined: AtomicU64,
    requeued: AtomicU64,
    store_errors: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    /// Deliveries handled.
    pub processed: u64,
    /// Leads that completed their route.
    pub enriched: u64,
    /// Leads stopped early by a gate or the budget.
    pub skipped: u64,
    /// Leads filed in the DLQ or poison list.
    pub dead_lettered: u64,
    /// Payloads that were not leads.
    pub quarantined: u64,
    /// Leads handed back to the ingestion queue at shutdown.
    pub requeued: u64,
    /// Store failures seen by the pop loop and by DLQ writes.
    pub store_errors: u64,
}

impl WorkerStats {
    fn observe(&self, disposition: LeadDisposition) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match disposition {
            LeadDisposition::Enriched => &self.enriched,
            LeadDisposition::SkippedEarly => &self.skipped,
            LeadDisposition::DeadLettered(_) => &self.dead_lettered,
            LeadDisposition::Quarantined => &self.quarantined,
            LeadDisposition::Requeued => &self.requeued,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counts.
    #[must_use]
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// One queue consumer.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: LeadQueue,
    dlq: DeadLetterQueue,
    registry: Arc<RouteRegistry>,
    engine: Arc<PipelineEngine>,
    pop_timeout: Duration,
    backoff: RetryPolicy,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Creates a worker with a 5s pop timeout.
    #[must_use]
    pub fn new(
        queue: LeadQueue,
        dlq: DeadLetterQueue,
        registry: Arc<RouteRegistry>,
        engine: Arc<PipelineEngine>,
    ) -> Self {
        Self {
            queue,
            dlq,
            registry,
            engine,
            pop_timeout: Duration::from_secs(5),
            backoff: RetryPolicy::new(),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Sets how long one pop waits. Bounds shutdown latency.
    #[must_use]
    pub const fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Sets the backoff used while the store is failing.
    #[must_use]
    pub const fn with_backoff(mut self, policy: RetryPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Handles one delivery.
    ///
    /// The `_route` field picks the route; leads without one run the default
    /// route. A lead naming an unknown route is filed in the DLQ.
    ///
    /// A popped lead is never dropped. DLQ writes that fail are retried with
    /// the worker's backoff; once `token` is cancelled the lead is returned
    /// to the ingestion queue instead.
    ///
    /// # Errors
    ///
    /// Returns an error only if the lead could be neither filed nor requeued.
    pub async fn process(
        &self,
        delivery: Delivery,
        token: &CancellationToken,
    ) -> Result<LeadDisposition, LeadflowError> {
        let disposition = match delivery {
            Delivery::Lead(lead) => self.process_lead(lead, token).await?,
            Delivery::Malformed { raw, reason } => {
                let (dlq, raw_ref, reason_ref) = (&self.dlq, raw.as_str(), reason.as_str());
                let filed = self
                    .persist(token, "quarantine", move || dlq.quarantine_raw(raw_ref, reason_ref))
                    .await;
                match filed {
                    Some(_) => LeadDisposition::Quarantined,
                    None => self.requeue(raw).await?,
                }
            }
        };
        self.stats.observe(disposition);
        Ok(disposition)
    }

    async fn process_lead(
        &self,
        mut lead: LeadRecord,
        token: &CancellationToken,
    ) -> Result<LeadDisposition, LeadflowError> {
        let requested = lead
            .remove(ROUTE_FIELD)
            .and_then(|v| v.as_str().map(str::to_string));

        let loaded = match &requested {
            Some(name) => self.registry.load(name, None),
            None => self.registry.load_default(None),
        };
        let route = match loaded {
            Ok(route) => route,
            Err(e) => {
                let original = requested.unwrap_or_default();
                tracing::error!(route = %original, error = %e, "Cannot resolve route for lead");
                return self
                    .file_failure(lead, &e.to_string(), &original, token)
                    .await;
            }
        };

        let run = self.engine.run(lead, &route).await;
        tracing::info!(
            run_id = %run.run_id,
            route = %run.route,
            status = %run.status(),
            cost = run.spent,
            "Lead processed"
        );

        match run.status() {
            RunStatus::Enriched => Ok(LeadDisposition::Enriched),
            RunStatus::SkippedEarly => Ok(LeadDisposition::SkippedEarly),
            RunStatus::Failed => {
                let message = run.failure_message();
                let route = run.route.clone();
                self.file_failure(run.data, &message, &route, token).await
            }
        }
    }

    async fn file_failure(
        &self,
        lead: LeadRecord,
        error: &str,
        route: &str,
        token: &CancellationToken,
    ) -> Result<LeadDisposition, LeadflowError> {
        let (dlq, snapshot) = (&self.dlq, &lead);
        if let Some(outcome) = self
            .persist(token, "dead_letter", move || dlq.push(snapshot, error, route))
            .await
        {
            return Ok(LeadDisposition::DeadLettered(outcome));
        }

        let mut returned = strip_pipeline_fields(&lead);
        if !route.is_empty() {
            returned.insert(ROUTE_FIELD.to_string(), Value::String(route.to_string()));
        }
        self.requeue(serde_json::to_string(&returned)?).await
    }

    /// Retries a DLQ write until it lands. Gives up with `None` only once
    /// `token` is cancelled.
    async fn persist<F, Fut>(
        &self,
        token: &CancellationToken,
        operation: &str,
        mut write: F,
    ) -> Option<PushOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PushOutcome, DlqError>>,
    {
        let mut backoff = Backoff::new(self.backoff.clone());
        loop {
            let error = match write().await {
                Ok(outcome) => return Some(outcome),
                Err(e) => e,
            };
            self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
            if token.is_cancelled() {
                tracing::warn!(operation, error = %error, "DLQ write failed during shutdown");
                return None;
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                operation,
                error = %error,
                attempt = backoff.attempts(),
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "DLQ write failed, retrying"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => {}
            }
        }
    }

    async fn requeue(&self, payload: String) -> Result<LeadDisposition, LeadflowError> {
        match self.queue.requeue_raw(payload.clone()).await {
            Ok(_) => {
                tracing::warn!(queue = %self.queue.key(), "Lead returned to the ingestion queue");
                Ok(LeadDisposition::Requeued)
            }
            Err(e) => {
                tracing::error!(
                    queue = %self.queue.key(),
                    payload = %payload,
                    error = %e,
                    "Lead could be neither filed nor requeued"
                );
                Err(e.into())
            }
        }
    }

    /// Pops and processes leads until `token` is cancelled.
    ///
    /// The token is checked between pops. Store failures are logged and
    /// retried after a backoff.
    pub async fn run(&self, id: usize, token: Arc<CancellationToken>) {
        let mut backoff = Backoff::new(self.backoff.clone());
        tracing::info!(worker = id, queue = %self.queue.key(), "Worker started");

        while !token.is_cancelled() {
            let result = match self.queue.pop(self.pop_timeout).await {
                Ok(Some(delivery)) => self.process(delivery, &token).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    self.stats.store_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    tracing::error!(
                        worker = id,
                        error = %e,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Worker iteration failed"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => {}
                    }
                }
            }
        }

        tracing::info!(worker = id, reason = ?token.reason(), "Worker stopped");
    }
}

/// A set of workers sharing one cancellation token.
#[derive(Debug)]
pub struct WorkerPool {
    token: Arc<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Spawns `count` copies of `worker` (at least one).
    #[must_use]
    pub fn spawn(worker: &Worker, count: usize) -> Self {
        let token = Arc::new(CancellationToken::new());
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = worker.clone();
                let token = token.clone();
                tokio::spawn(async move { worker.run(id, token).await })
            })
            .collect::<Vec<_>>();
        tracing::info!(workers = handles.len(), "Worker pool started");

        Self {
            token,
            handles,
            stats: worker.stats(),
        }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The pool's cancellation token.
    #[must_use]
    pub fn token(&self) -> Arc<CancellationToken> {
        self.token.clone()
    }

    /// Shared counters of every worker.
    #[must_use]
    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancels every worker and waits for them to finish their current lead.
    pub async fn shutdown(self, reason: &str) -> WorkerStatsSnapshot {
        self.token.cancel(reason);
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        let stats = self.stats.snapshot();
        tracing::info!(processed = stats.processed, "Worker pool stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::DlqConfig;
    use crate::retry::JitterStrategy;
    use crate::store::{InMemoryStore, SharedStore};
    use crate::testing::{sample_lead, scenario_route, FaultyStore, ScenarioOptions};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        store: Arc<dyn SharedStore>,
        queue: LeadQueue,
        dlq: DeadLetterQueue,
        worker: Worker,
        token: CancellationToken,
    }

    fn harness(options: &ScenarioOptions) -> Harness {
        harness_on(Arc::new(InMemoryStore::new()), options)
    }

    fn harness_on(store: Arc<dyn SharedStore>, options: &ScenarioOptions) -> Harness {
        let queue = LeadQueue::new(store.clone(), "leads_to_enrich");
        let dlq = DeadLetterQueue::new(store.clone(), queue.clone(), DlqConfig::default());

        let registry = Arc::new(RouteRegistry::new());
        let route = scenario_route(options, 1.0);
        registry
            .register("hybrid_smart", route.stations().to_vec(), 1.0)
            .unwrap();
        registry.set_default_route("hybrid_smart").unwrap();

        let worker = Worker::new(
            queue.clone(),
            dlq.clone(),
            registry,
            Arc::new(PipelineEngine::new()),
        )
        .with_pop_timeout(Duration::from_millis(20))
        .with_backoff(
            RetryPolicy::new()
                .with_base_delay_ms(1)
                .with_max_delay_ms(5)
                .with_jitter(JitterStrategy::None),
        );

        Harness {
            store,
            queue,
            dlq,
            worker,
            token: CancellationToken::new(),
        }
    }

    fn failing_route() -> ScenarioOptions {
        ScenarioOptions {
            skip_trace_phone: None,
            ..ScenarioOptions::default()
        }
    }

    #[tokio::test]
    async fn test_default_route_enriches() {
        let h = harness(&ScenarioOptions::default());
        let disposition = h
            .worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();

        assert_eq!(disposition, LeadDisposition::Enriched);
        assert_eq!(h.dlq.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_lead_is_dead_lettered() {
        let h = harness(&failing_route());
        let disposition = h
            .worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();

        assert!(matches!(
            disposition,
            LeadDisposition::DeadLettered(PushOutcome::Queued(_))
        ));
        let entries = h.dlq.list(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].original_route, "hybrid_smart");
        assert!(entries[0].error_message.contains("no phone found"));
        assert_eq!(entries[0].lead_snapshot["firstName"], json!("John"));
    }

    #[tokio::test]
    async fn test_dnc_gate_is_not_a_failure() {
        let h = harness(&ScenarioOptions {
            on_dnc: true,
            ..ScenarioOptions::default()
        });
        let disposition = h
            .worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();

        assert_eq!(disposition, LeadDisposition::SkippedEarly);
        assert_eq!(h.dlq.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_dead_lettered() {
        let h = harness(&ScenarioOptions::default());
        let mut lead = sample_lead();
        lead.insert(ROUTE_FIELD.to_string(), json!("nope"));

        h.worker.process(Delivery::Lead(lead), &h.token).await.unwrap();

        let entries = h.dlq.list(10).await.unwrap();
        assert_eq!(entries[0].original_route, "nope");
        assert!(entries[0].error_message.contains("Route 'nope' not found"));
        assert!(!entries[0].lead_snapshot.contains_key(ROUTE_FIELD));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_quarantined() {
        let h = harness(&ScenarioOptions::default());
        h.store
            .push_front("leads_to_enrich", "[1, 2]".to_string())
            .await
            .unwrap();

        let delivery = h.queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        let disposition = h.worker.process(delivery, &h.token).await.unwrap();

        assert_eq!(disposition, LeadDisposition::Quarantined);
        assert_eq!(h.dlq.list_poison(10).await.unwrap().len(), 1);
        assert_eq!(h.worker.stats().snapshot().quarantined, 1);
    }

    #[tokio::test]
    async fn test_retried_lead_runs_again() {
        let h = harness(&failing_route());
        h.worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();
        h.dlq.retry_one(0).await.unwrap();

        let delivery = h.queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        h.worker.process(delivery, &h.token).await.unwrap();

        let entries = h.dlq.list(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_dlq_outage_is_retried_until_filed() {
        let store = Arc::new(FaultyStore::new().fail_pushes("dlq:", 3));
        let h = harness_on(store.clone(), &failing_route());

        let disposition = h
            .worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();

        assert!(matches!(
            disposition,
            LeadDisposition::DeadLettered(PushOutcome::Queued(_))
        ));
        assert_eq!(store.failed_pushes(), 3);
        assert_eq!(h.dlq.len().await.unwrap(), 1);
        assert_eq!(h.worker.stats().snapshot().store_errors, 3);
    }

    #[tokio::test]
    async fn test_dlq_outage_at_shutdown_requeues_lead() {
        let store = Arc::new(FaultyStore::new().fail_pushes("dlq:", usize::MAX));
        let h = harness_on(store, &failing_route());
        h.token.cancel("shutting down");

        let disposition = h
            .worker
            .process(Delivery::Lead(sample_lead()), &h.token)
            .await
            .unwrap();

        assert_eq!(disposition, LeadDisposition::Requeued);
        assert_eq!(h.dlq.len().await.unwrap(), 0);
        let Some(Delivery::Lead(returned)) = h.queue.pop(Duration::from_millis(10)).await.unwrap()
        else {
            panic!("expected the lead back on the queue");
        };
        assert_eq!(returned["firstName"], json!("John"));
        assert_eq!(returned[ROUTE_FIELD], json!("hybrid_smart"));
        assert!(!returned.keys().any(|k| k.starts_with("_pipeline_")));
        assert_eq!(h.worker.stats().snapshot().requeued, 1);
    }

    #[tokio::test]
    async fn test_unfiled_malformed_payload_is_requeued_at_shutdown() {
        let store = Arc::new(FaultyStore::new().fail_pushes("dlq:", usize::MAX));
        let h = harness_on(store, &ScenarioOptions::default());
        h.token.cancel("shutting down");

        let delivery = Delivery::Malformed {
            raw: "{{{".to_string(),
            reason: "expected value".to_string(),
        };
        let disposition = h.worker.process(delivery, &h.token).await.unwrap();

        assert_eq!(disposition, LeadDisposition::Requeued);
        assert_eq!(h.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_shuts_down() {
        let h = harness(&ScenarioOptions::default());
        for _ in 0..3 {
            h.queue.push(&sample_lead()).await.unwrap();
        }

        let pool = WorkerPool::spawn(&h.worker, 2);
        assert_eq!(pool.len(), 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.stats().processed < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pool should drain the queue");

        let stats = pool.shutdown("test done").await;
        assert_eq!(stats.enriched, 3);
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }
}
