//! Generation stage with a bounded tool-calling loop.

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::{FailureKind, GenerationError, ToolError};
use crate::generation::{GenerationReply, GenerationRequest, Message, ResponseFormat};
use crate::pipeline::GenerationConfig;
use crate::stages::Stage;
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Asks the generation backend for an answer, executing the tool calls it
/// requests in between.
///
/// The instruction template is rendered against session state and sent as
/// the system message; the value under `input_key`, if any, is the user
/// message. Only tools in both the stage's capability set and the client's
/// allow-list are offered.
#[derive(Debug, Clone, Default)]
pub struct GenerationStage;

impl GenerationStage {
    /// Creates a generation stage; its settings live on the [`crate::pipeline::StageSpec`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Builds the opening messages for a generation or decision stage.
pub(crate) fn opening_messages(ctx: &StageContext<'_>, config: &GenerationConfig) -> Vec<Message> {
    let mut messages = vec![Message::system(ctx.state().render_template(&config.instruction))];
    if let Some(key) = &config.input_key {
        messages.push(Message::user(ctx.state().render_value(key)));
    }
    messages
}

/// Resolves the model a stage should use.
pub(crate) fn model_for(ctx: &StageContext<'_>, config: &GenerationConfig) -> String {
    config
        .model
        .clone()
        .unwrap_or_else(|| ctx.services().default_model.clone())
}

fn offered_tools(ctx: &StageContext<'_>) -> Vec<ToolDescriptor> {
    let Some(client) = ctx.services().tools.as_ref() else {
        return Vec::new();
    };
    ctx.spec()
        .capabilities
        .iter()
        .copied()
        .filter(|tool| client.is_allowed(*tool))
        .collect()
}

fn final_value(text: String, format: ResponseFormat) -> Value {
    match format {
        ResponseFormat::Json => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        ResponseFormat::Text => Value::String(text),
    }
}

#[async_trait]
impl Stage for GenerationStage {
    fn name(&self) -> &str {
        "generation"
    }

    fn kind(&self) -> StageKind {
        StageKind::Agent
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let Some(config) = ctx.spec().generation.as_ref() else {
            return StageOutput::fail(
                FailureKind::Configuration,
                format!("Stage '{}' has no generation settings", ctx.stage_name()),
            );
        };
        let Some(backend) = ctx.services().generation.as_ref() else {
            return StageOutput::from_generation_error(&GenerationError::NotConfigured(
                ctx.stage_name().to_string(),
            ));
        };

        let model = model_for(ctx, config);
        let tools = offered_tools(ctx);
        let mut messages = opening_messages(ctx, config);

        for round in 0..=config.max_tool_rounds {
            if ctx.is_cancelled() {
                return StageOutput::cancel(ctx.cancel_token().reason_or_default());
            }

            let request = GenerationRequest::new(model.clone(), messages.clone())
                .with_tools(tools.clone())
                .with_response_format(config.response_format)
                .with_temperature(config.temperature);

            let calls = match backend.generate(request).await {
                Ok(GenerationReply::Text(text)) => {
                    info!(stage = %ctx.stage_name(), rounds = round, "Generation completed");
                    return StageOutput::ok_value(final_value(text, config.response_format));
                }
                Ok(GenerationReply::ToolCalls(calls)) => calls,
                Err(e) => {
                    warn!(stage = %ctx.stage_name(), error = %e, "Generation failed");
                    return StageOutput::from_generation_error(&e);
                }
            };

            if round == config.max_tool_rounds {
                break;
            }

            messages.push(Message::assistant_tool_calls(calls.clone()));
            for call in calls {
                debug!(stage = %ctx.stage_name(), tool = %call.name, "Backend requested tool");
                match ctx.invoke_tool_named(&call.name, call.arguments, None).await {
                    Ok(response) => {
                        messages.push(Message::tool_result(call.id, response.to_content().to_string()));
                    }
                    Err(e @ (ToolError::Rpc { .. } | ToolError::InvalidParams { .. })) => {
                        warn!(stage = %ctx.stage_name(), tool = %call.name, error = %e, "Tool call refused by endpoint");
                        messages.push(Message::tool_result(call.id, json!({"error": e.to_string()}).to_string()));
                    }
                    Err(e) => return StageOutput::from_tool_error(&e),
                }
            }
        }

        StageOutput::from_generation_error(&GenerationError::TooManyToolRounds {
            rounds: config.max_tool_rounds,
        })
    }
}
