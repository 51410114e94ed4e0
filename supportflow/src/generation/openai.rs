//! OpenAI-compatible chat completions backend.

use super::{
    GenerationBackend, GenerationReply, GenerationRequest, Message, ResponseFormat, Role,
    ToolCallRequest,
};
use crate::errors::GenerationError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Calls `{base}/chat/completions`.
#[derive(Clone)]
pub struct OpenAiChatBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatBackend")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl OpenAiChatBackend {
    /// Creates a backend.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::NotConfigured`] if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(encode_message).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name(),
                            "description": tool.description(),
                            "parameters": tool.input_schema(),
                        }
                    })
                })
                .collect();
        }
        if request.response_format == ResponseFormat::Json {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

fn encode_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut encoded = json!({"role": role, "content": message.content});

    if let Some(ref id) = message.tool_call_id {
        encoded["tool_call_id"] = json!(id);
    }
    if !message.tool_calls.is_empty() {
        encoded["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments.to_string()},
                })
            })
            .collect();
    }
    encoded
}

fn decode_reply(body: &Value) -> Result<GenerationReply, GenerationError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| GenerationError::InvalidResponse("no choices in response".to_string()))?;

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        if !calls.is_empty() {
            return calls
                .iter()
                .map(decode_tool_call)
                .collect::<Result<Vec<_>, _>>()
                .map(GenerationReply::ToolCalls);
        }
    }

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(GenerationReply::Text(text))
}

fn decode_tool_call(call: &Value) -> Result<ToolCallRequest, GenerationError> {
    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .ok_or_else(|| GenerationError::InvalidResponse("tool call without name".to_string()))?;
    let arguments = match call.pointer("/function/arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|e| GenerationError::InvalidResponse(format!("bad arguments for {name}: {e}")))?,
        Some(other) => other.clone(),
        None => json!({}),
    };

    Ok(ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

#[async_trait]
impl GenerationBackend for OpenAiChatBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply, GenerationError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = Self::request_body(&request);
        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), "Sending generation request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
        decode_reply(&body)
    }
}
