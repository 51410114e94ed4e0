//! Session lifecycle events.
//!
//! The executor reports what each session does through an [`EventSink`]
//! passed to it at construction.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kinds of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A session began executing.
    #[serde(rename = "session.started")]
    SessionStarted,
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage finished successfully.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage failed or was cancelled.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// A decision stage chose a branch.
    #[serde(rename = "route.selected")]
    RouteSelected,
    /// A session produced its output.
    #[serde(rename = "session.completed")]
    SessionCompleted,
    /// A session halted with a failure descriptor.
    #[serde(rename = "session.failed")]
    SessionFailed,
}

impl EventType {
    /// The wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session.started",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::RouteSelected => "route.selected",
            Self::SessionCompleted => "session.completed",
            Self::SessionFailed => "session.failed",
        }
    }

    /// Returns true for failure events.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::StageFailed | Self::SessionFailed)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// What happened.
    pub event_type: EventType,
    /// The session it happened in.
    pub session_id: String,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Event-specific details.
    #[serde(default)]
    pub data: Value,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Creates a new event stamped now.
    #[must_use]
    pub fn new(event_type: EventType, session_id: impl Into<String>) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            stage: None,
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_wire_name() {
        let event = SessionEvent::new(EventType::RouteSelected, "s1")
            .with_stage("router")
            .with_data(json!({"next_stage": "support"}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event_type"], "route.selected");
        assert_eq!(value["stage"], "router");
        assert_eq!(value["data"]["next_stage"], "support");
    }

    #[test]
    fn test_failure_events() {
        assert!(EventType::StageFailed.is_failure());
        assert!(EventType::SessionFailed.is_failure());
        assert!(!EventType::StageCompleted.is_failure());
    }
}
