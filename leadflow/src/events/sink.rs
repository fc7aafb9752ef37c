//! Event sink trait and the basic sinks.

use super::PipelineEvent;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives pipeline events.
///
/// `emit` is called inline by the engine, so it must return quickly and
/// must never fail the run.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: &PipelineEvent);
}

/// Discards every event. The engine default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Mirrors events into `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (DEBUG or INFO; anything else logs at INFO).
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let run_id = event.run_id();
        if self.level == Level::DEBUG {
            debug!(event_type, run_id = %run_id, event = ?event, "Event: {}", event_type);
        } else {
            info!(event_type, run_id = %run_id, event = ?event, "Event: {}", event_type);
        }
    }
}

/// Keeps every event in memory. For tests and the admin preview.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events so far.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the dotted names of all events so far.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(PipelineEvent::event_type).collect()
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops every collected event.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn started() -> PipelineEvent {
        PipelineEvent::StationStarted {
            run_id: Uuid::new_v4(),
            station: "Identity Resolution".to_string(),
            index: 0,
        }
    }

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(&started());
        LoggingEventSink::default().emit(&started());
        LoggingEventSink::debug().emit(&started());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&started());
        sink.emit(&started());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["station.started", "station.started"]);

        sink.clear();
        assert!(sink.is_empty());
    }
}
