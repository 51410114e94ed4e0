//! Stage that performs one tool call described by state.

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::{FailureKind, RoutingParseError};
use crate::stages::{Stage, PRIORITY_KEY};
use crate::tools::{ToolDescriptor, ToolResponse};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// State key holding the session's customer id.
pub const CUSTOMER_ID_KEY: &str = "customer_id";

/// Invokes a single tool.
///
/// The request is either fixed at construction or read from state as
/// `{"tool": "<name>", "params": {...}}`. A business rejection is a
/// successful stage whose value carries `error`.
#[derive(Debug, Clone)]
pub struct ToolStage {
    source: RequestSource,
    timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
enum RequestSource {
    State(String),
    Fixed { tool: ToolDescriptor, params: Value },
}

impl ToolStage {
    /// Creates a stage reading its request from `request_key`.
    #[must_use]
    pub fn from_state(request_key: impl Into<String>) -> Self {
        Self {
            source: RequestSource::State(request_key.into()),
            timeout: None,
        }
    }

    /// Creates a stage that always makes the same call.
    #[must_use]
    pub fn fixed(tool: ToolDescriptor, params: Value) -> Self {
        Self {
            source: RequestSource::Fixed { tool, params },
            timeout: None,
        }
    }

    /// Overrides the client's per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn request(&self, ctx: &StageContext<'_>) -> Result<(ToolDescriptor, Value), StageOutput> {
        match &self.source {
            RequestSource::Fixed { tool, params } => Ok((*tool, params.clone())),
            RequestSource::State(key) => {
                let Some(request) = ctx.state().get(key) else {
                    return Err(StageOutput::fail(
                        FailureKind::Configuration,
                        format!("Missing tool request under '{key}'"),
                    ));
                };
                let Some(name) = request.get("tool").and_then(Value::as_str) else {
                    return Err(failed_request("tool request names no tool", request));
                };
                let Some(tool) = ToolDescriptor::from_name(name) else {
                    return Err(failed_request(&format!("unknown tool '{name}'"), request));
                };
                let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
                if !params.is_object() {
                    return Err(failed_request("tool params must be an object", request));
                }
                Ok((tool, params))
            }
        }
    }
}

fn failed_request(reason: &str, request: &Value) -> StageOutput {
    StageOutput::routing_failed(RoutingParseError::new(reason, request.to_string()))
}

/// Fills parameters the router may leave out from session state.
fn complete_params(tool: ToolDescriptor, params: Value, ctx: &StageContext<'_>) -> Value {
    let mut params: Map<String, Value> = match params {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if tool != ToolDescriptor::ListCustomers && !params.contains_key("customer_id") {
        if let Some(id) = ctx.state().get(CUSTOMER_ID_KEY) {
            params.insert("customer_id".to_string(), id.clone());
        }
    }
    if tool == ToolDescriptor::CreateTicket && !params.contains_key("priority") {
        if let Some(priority) = ctx.state().get(PRIORITY_KEY) {
            params.insert("priority".to_string(), priority.clone());
        }
    }

    Value::Object(params)
}

#[async_trait]
impl Stage for ToolStage {
    fn name(&self) -> &str {
        "tool"
    }

    fn kind(&self) -> StageKind {
        StageKind::Work
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let (tool, params) = match self.request(ctx) {
            Ok(request) => request,
            Err(output) => return output,
        };
        let params = complete_params(tool, params, ctx);
        debug!(stage = %ctx.stage_name(), tool = %tool, params = %params, "Invoking tool");

        match ctx.invoke_tool(tool, params.clone(), self.timeout).await {
            Ok(ToolResponse::Success(result)) => {
                info!(stage = %ctx.stage_name(), tool = %tool, "Tool call succeeded");
                StageOutput::ok_value(json!({"tool": tool.name(), "params": params, "result": result}))
            }
            Ok(ToolResponse::Rejected { reason }) => {
                info!(stage = %ctx.stage_name(), tool = %tool, reason = %reason, "Tool rejected request");
                StageOutput::ok_value(json!({"tool": tool.name(), "params": params, "error": reason}))
            }
            Err(e) => StageOutput::from_tool_error(&e),
        }
    }
}
