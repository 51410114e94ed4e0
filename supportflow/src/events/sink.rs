//! Event sink trait and implementations.

use super::SessionEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Receives session lifecycle events.
///
/// Sinks are handed to the executor explicitly; there is no process-wide
/// default.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Emits an event asynchronously.
    async fn emit(&self, event: SessionEvent) {
        self.try_emit(event);
    }

    /// Emits an event without blocking. Must never panic.
    fn try_emit(&self, event: SessionEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: SessionEvent) {}
}

/// An event sink that logs events using the tracing framework.
///
/// Failure events are always logged at `WARN`.
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
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: SessionEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");
        if event.event_type.is_failure() {
            warn!(
                event_type = %event.event_type,
                session_id = %event.session_id,
                stage = %stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                session_id = %event.session_id,
                stage = %stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                session_id = %event.session_id,
                stage = %stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<SessionEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.read().clone()
    }

    /// Returns the wire names of collected events, in order.
    #[must_use]
    pub fn types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event_type.as_str()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events for one session.
    #[must_use]
    pub fn for_session(&self, session_id: &str) -> Vec<SessionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: SessionEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(SessionEvent::new(EventType::SessionStarted, "s1")).await;
        let sink = LoggingEventSink::default();
        sink.emit(SessionEvent::new(EventType::StageFailed, "s1").with_stage("router")).await;
        LoggingEventSink::debug().try_emit(SessionEvent::new(EventType::StageStarted, "s1"));
    }

    #[tokio::test]
    async fn test_collecting_sink_keeps_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(SessionEvent::new(EventType::SessionStarted, "a")).await;
        sink.try_emit(SessionEvent::new(EventType::StageStarted, "b").with_data(json!({"x": 1})));
        sink.try_emit(SessionEvent::new(EventType::SessionCompleted, "a"));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.types(), vec!["session.started", "stage.started", "session.completed"]);
        assert_eq!(sink.for_session("a").len(), 2);
    }
}
