//! Text-generation backends.
//!
//! Stages talk to a [`GenerationBackend`]; the backend may answer with text
//! or ask for tool calls, which the calling stage executes and feeds back.

mod openai;

pub use openai::OpenAiChatBackend;

use crate::errors::GenerationError;
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions.
    System,
    /// End-user input.
    User,
    /// Backend output.
    Assistant,
    /// Tool result.
    Tool,
}

/// A tool call requested by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Backend-assigned call id.
    pub id: String,
    /// Tool wire name.
    pub name: String,
    /// Decoded arguments.
    pub arguments: Value,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// For tool results, the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For assistant turns, the calls it requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Creates an assistant message that requested tool calls.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: calls,
        }
    }

    /// Creates a tool result message.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Output constraint for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free text.
    #[default]
    Text,
    /// A single JSON object.
    Json,
}

/// A generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Tools the backend may call.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Output constraint.
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    /// Creates a request with no tools and free-text output.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            response_format: ResponseFormat::Text,
            temperature: None,
        }
    }

    /// Sets the callable tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the response format.
    #[must_use]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// What the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationReply {
    /// Final text.
    Text(String),
    /// Requested tool calls; the caller runs them and asks again.
    ToolCalls(Vec<ToolCallRequest>),
}

/// A text-generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync + std::fmt::Debug {
    /// Generates a reply.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply, GenerationError>;
}
