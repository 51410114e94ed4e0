//! Error types for the supportflow crate.
//!
//! Each subsystem has its own error enum; `SupportflowError` wraps them for
//! callers that do not care which layer failed. Session-level failures are
//! reported as a [`FailureDescriptor`] rather than an error enum so that a
//! failed pipeline run always names the stage and the kind of failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for supportflow operations.
#[derive(Debug, Error)]
pub enum SupportflowError {
    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A credential could not be obtained.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// A tool invocation failed.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// A pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The generation backend failed.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// A routing decision could not be parsed.
    #[error("{0}")]
    Routing(#[from] RoutingParseError),

    /// A session with the same id is already running.
    #[error("Session '{0}' is already running")]
    SessionBusy(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is not set.
    #[error("The environment variable {key} is not set")]
    Missing {
        /// The missing key.
        key: String,
    },

    /// A value is set but cannot be used.
    #[error("Invalid value for {key} ({value:?}): {reason}")]
    Invalid {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a missing-key error.
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing { key: key.into() }
    }

    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while obtaining bearer credentials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The token source could not produce a token.
    #[error("Failed to fetch token for audience {audience}: {reason}")]
    Fetch {
        /// The audience the token was requested for.
        audience: String,
        /// The underlying reason.
        reason: String,
    },

    /// The token source returned something that is not a usable token.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The token source could not be constructed.
    #[error("Failed to build token source client: {0}")]
    Client(String),
}

impl AuthError {
    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(audience: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            audience: audience.into(),
            reason: reason.into(),
        }
    }
}

/// Errors related to tool invocation.
///
/// Business-rule rejections from the tool server are *not* errors; they come
/// back as [`crate::tools::ToolResponse::Rejected`].
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The tool is unknown or not on the client's allow-list.
    #[error("Tool not allowed: {name}")]
    NotAllowed {
        /// The requested tool name.
        name: String,
    },

    /// The stage did not declare the tool in its capability set.
    #[error("Stage '{stage}' is not permitted to call tool '{tool}'")]
    NotPermitted {
        /// The calling stage.
        stage: String,
        /// The tool name.
        tool: String,
    },

    /// Parameters could not be encoded for the tool.
    #[error("Invalid parameters for {name}: {reason}")]
    InvalidParams {
        /// The tool name.
        name: String,
        /// The reason.
        reason: String,
    },

    /// The connection failed before a response was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The call did not complete within its timeout.
    #[error("Tool call timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The endpoint answered with a non-success HTTP status.
    #[error("Tool endpoint returned HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, kept for diagnostics.
        body: String,
    },

    /// The endpoint answered with a JSON-RPC error object.
    #[error("Tool endpoint returned RPC error {code}: {message}")]
    Rpc {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message.
        message: String,
    },

    /// The response could not be decoded.
    #[error("Invalid tool response: {0}")]
    InvalidResponse(String),

    /// No credential could be attached to the call.
    #[error("{0}")]
    Credential(#[from] AuthError),

    /// The session was cancelled while the call was in flight.
    #[error("Tool call cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// Allow-listed tools are missing from the server catalog.
    #[error("Tool endpoint does not advertise: {}", missing.join(", "))]
    CatalogMismatch {
        /// The allow-listed names the server did not advertise.
        missing: Vec<String>,
    },
}

impl ToolError {
    /// Creates a not-allowed error.
    #[must_use]
    pub fn not_allowed(name: impl Into<String>) -> Self {
        Self::NotAllowed { name: name.into() }
    }

    /// Creates a capability violation error.
    #[must_use]
    pub fn not_permitted(stage: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::NotPermitted {
            stage: stage.into(),
            tool: tool.into(),
        }
    }

    /// Returns true for transient transport failures worth retrying.
    ///
    /// Connection errors, timeouts and 5xx responses are retryable. 4xx
    /// responses, RPC errors and everything raised before the request left
    /// the process are terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Maps the error onto the session failure taxonomy.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotAllowed { .. }
            | Self::NotPermitted { .. }
            | Self::InvalidParams { .. }
            | Self::Rpc { .. }
            | Self::CatalogMismatch { .. } => FailureKind::Tool,
            Self::Transport(_)
            | Self::Timeout { .. }
            | Self::Status { .. }
            | Self::InvalidResponse(_) => FailureKind::Transport,
            Self::Credential(_) => FailureKind::Credential,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// Errors raised by a text-generation backend.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// No backend or configuration is available for the stage.
    #[error("Generation backend not configured: {0}")]
    NotConfigured(String),

    /// The request could not be sent.
    #[error("Generation request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("Generation backend returned HTTP {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },

    /// The backend response could not be decoded.
    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),

    /// The backend kept requesting tools past the configured bound.
    #[error("Generation exceeded {rounds} tool rounds")]
    TooManyToolRounds {
        /// The configured bound.
        rounds: usize,
    },
}

/// A routing decision that could not be parsed.
///
/// Carries the raw backend text so the failure can be diagnosed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed routing decision: {reason}")]
pub struct RoutingParseError {
    /// Why parsing failed.
    pub reason: String,
    /// The unparsed backend output.
    pub raw: String,
}

impl RoutingParseError {
    /// Creates a new routing parse error.
    #[must_use]
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Classification of a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing configuration or a required state key.
    Configuration,
    /// Network, timeout or 5xx failure after retries.
    Transport,
    /// A tool outside the allow-list or the stage's capabilities.
    Tool,
    /// No credential could be obtained.
    Credential,
    /// The generation backend failed.
    Generation,
    /// A decision stage produced unusable output.
    Routing,
    /// The session was cancelled.
    Cancelled,
    /// The session exceeded its wall-clock budget.
    Timeout,
    /// The session was already running elsewhere.
    Conflict,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Tool => "tool",
            Self::Credential => "credential",
            Self::Generation => "generation",
            Self::Routing => "routing",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// The structured result of a failed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Session {session_id} failed at stage '{stage}' ({kind}): {message}")]
pub struct FailureDescriptor {
    /// The failed session.
    pub session_id: String,
    /// The stage that failed.
    pub stage: String,
    /// The failure classification.
    pub kind: FailureKind,
    /// A diagnostic message.
    pub message: String,
    /// Unparsed backend output, for routing failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl FailureDescriptor {
    /// Creates a new failure descriptor.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        stage: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage: stage.into(),
            kind,
            message: message.into(),
            raw: None,
        }
    }

    /// Attaches raw diagnostic text.
    #[must_use]
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("session_id".to_string(), serde_json::json!(self.session_id));
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref raw) = self.raw {
            map.insert("raw".to_string(), serde_json::json!(raw));
        }
        map
    }
}
