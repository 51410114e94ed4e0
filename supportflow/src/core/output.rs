//! Stage output type with factory methods.

use super::{RoutingResult, StageStatus};
use crate::errors::{FailureKind, GenerationError, RoutingParseError, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The failure classification.
    pub kind: FailureKind,
    /// A diagnostic message.
    pub message: String,
    /// Unparsed backend output, for routing failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// The output of a stage execution.
///
/// Stages never write to the session state directly. The executor applies
/// `value` under the stage's output key and then every entry of `writes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// The value stored under the stage's output key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Additional state writes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub writes: HashMap<String, Value>,

    /// The branch chosen by a decision stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RoutingResult>,

    /// Failure details (for failed or cancelled executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok_empty()
    }
}

impl StageOutput {
    /// Creates a successful output with no value.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            status: StageStatus::Ok,
            value: None,
            writes: HashMap::new(),
            route: None,
            failure: None,
        }
    }

    /// Creates a successful output carrying the output-key value.
    #[must_use]
    pub fn ok_value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::ok_empty()
        }
    }

    /// Creates a successful decision output.
    #[must_use]
    pub fn routed(route: RoutingResult) -> Self {
        Self {
            value: Some(route.payload.clone()),
            route: Some(route),
            ..Self::ok_empty()
        }
    }

    /// Creates a failure output.
    #[must_use]
    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            failure: Some(StageFailure {
                kind,
                message: message.into(),
                raw: None,
            }),
            ..Self::ok_empty()
        }
    }

    /// Creates a cancel output with a reason.
    #[must_use]
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Cancel,
            failure: Some(StageFailure {
                kind: FailureKind::Cancelled,
                message: reason.into(),
                raw: None,
            }),
            ..Self::ok_empty()
        }
    }

    /// Maps a tool error onto a stage failure; cancellation stays a cancel.
    #[must_use]
    pub fn from_tool_error(error: &ToolError) -> Self {
        match error {
            ToolError::Cancelled { reason } => Self::cancel(reason.clone()),
            other => Self::fail(other.failure_kind(), other.to_string()),
        }
    }

    /// Maps a generation error onto a stage failure.
    #[must_use]
    pub fn from_generation_error(error: &GenerationError) -> Self {
        Self::fail(FailureKind::Generation, error.to_string())
    }

    /// Creates a routing failure that keeps the raw backend text.
    #[must_use]
    pub fn routing_failed(error: RoutingParseError) -> Self {
        Self {
            status: StageStatus::Fail,
            failure: Some(StageFailure {
                kind: FailureKind::Routing,
                message: error.to_string(),
                raw: Some(error.raw),
            }),
            ..Self::ok_empty()
        }
    }

    /// Adds a state write.
    #[must_use]
    pub fn with_write(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.writes.insert(key.into(), value.into());
        self
    }

    /// Returns true if the output indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the output indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Converts the output to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));

        if let Some(ref value) = self.value {
            map.insert("value".to_string(), value.clone());
        }

        if !self.writes.is_empty() {
            let writes: serde_json::Map<String, Value> = self.writes.clone().into_iter().collect();
            map.insert("writes".to_string(), Value::Object(writes));
        }

        if let Some(ref route) = self.route {
            map.insert("next_stage".to_string(), serde_json::json!(route.next_stage));
        }

        if let Some(ref failure) = self.failure {
            map.insert("kind".to_string(), serde_json::json!(failure.kind.to_string()));
            map.insert("error".to_string(), serde_json::json!(failure.message));
            if let Some(ref raw) = failure.raw {
                map.insert("raw".to_string(), serde_json::json!(raw));
            }
        }

        map
    }
}
