//! Bounded channel sink for streaming progress to a consumer task.

use super::{EventSink, PipelineEvent};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Delivery counters for a [`ChannelEventSink`].
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryMetrics {
    /// Events handed to the channel.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events lost because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Percentage of events dropped, 2 decimals.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_rate(&self) -> f64 {
        let delivered = self.delivered();
        let dropped = self.dropped();
        let total = delivered + dropped;
        if total == 0 {
            return 0.0;
        }
        (dropped as f64 / total as f64 * 10_000.0).round() / 100.0
    }

    /// Converts to JSON for status endpoints.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        json!({
            "delivered": self.delivered(),
            "dropped": self.dropped(),
            "drop_rate_percent": self.drop_rate(),
        })
    }
}

/// Sends events into a bounded `mpsc` channel without waiting.
///
/// When the receiver falls behind, events are dropped and counted.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<PipelineEvent>,
    metrics: Arc<DeliveryMetrics>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver for its events.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                metrics: Arc::new(DeliveryMetrics::default()),
            },
            rx,
        )
    }

    /// Returns the delivery counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<DeliveryMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &PipelineEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {
                self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let dropped = self.metrics.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Warn on the first drop and then every 100th.
                if dropped == 1 || dropped % 100 == 0 {
                    tracing::warn!(
                        event_type = event.event_type(),
                        dropped,
                        error = %e,
                        "Progress event dropped"
                    );
                }
            }
        }
    }
}
