//! Decision stage: JSON-constrained generation that picks a branch.

use super::generation::{model_for, opening_messages};
use crate::context::StageContext;
use crate::core::{parse_routing_result, StageKind, StageOutput};
use crate::errors::{FailureKind, GenerationError, RoutingParseError};
use crate::generation::{GenerationReply, GenerationRequest, ResponseFormat};
use crate::stages::Stage;
use async_trait::async_trait;
use tracing::{info, warn};

/// Asks the backend for `{"next_stage": ..., "payload": ...}` and turns it
/// into a [`crate::core::RoutingResult`].
///
/// There is no default route: unusable output fails the stage with the raw
/// text attached.
#[derive(Debug, Clone, Default)]
pub struct DecisionStage;

impl DecisionStage {
    /// Creates a decision stage; its settings live on the [`crate::pipeline::StageSpec`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for DecisionStage {
    fn name(&self) -> &str {
        "decision"
    }

    fn kind(&self) -> StageKind {
        StageKind::Route
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

        let request = GenerationRequest::new(model_for(ctx, config), opening_messages(ctx, config))
            .with_response_format(ResponseFormat::Json)
            .with_temperature(config.temperature);

        let raw = match backend.generate(request).await {
            Ok(GenerationReply::Text(text)) => text,
            Ok(GenerationReply::ToolCalls(calls)) => {
                let raw = serde_json::to_string(&calls).unwrap_or_default();
                return StageOutput::routing_failed(RoutingParseError::new(
                    "decision requested tool calls",
                    raw,
                ));
            }
            Err(e) => return StageOutput::from_generation_error(&e),
        };

        match parse_routing_result(&raw) {
            Ok(route) => {
                info!(stage = %ctx.stage_name(), next_stage = %route.next_stage, "Routing decision");
                StageOutput::routed(route)
            }
            Err(e) => {
                warn!(stage = %ctx.stage_name(), reason = %e.reason, "Unusable routing decision");
                StageOutput::routing_failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ToolCallRequest;
    use crate::pipeline::GenerationConfig;
    use crate::testing::{ScriptedBackend, StageHarness};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn harness(reply: GenerationReply) -> (StageHarness, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new([reply]));
        let harness = StageHarness::new()
            .with_generation(backend.clone())
            .with_generation_config(GenerationConfig::new("Route: {{ PROMPT }}"))
            .with_state("PROMPT", json!("show my tickets"));
        (harness, backend)
    }

    #[tokio::test]
    async fn test_fenced_next_agent_is_routed() {
        let raw = "```json\n{\"next_agent\": \"customer_data\", \"tool\": \"get_customer_history\"}\n```";
        let (harness, backend) = harness(GenerationReply::Text(raw.into()));

        let output = harness.run(Arc::new(DecisionStage::new())).await;
        let route = output.route.unwrap();
        assert_eq!(route.next_stage, "customer_data");
        assert_eq!(route.payload, json!({"tool": "get_customer_history"}));
        assert_eq!(backend.requests()[0].response_format, ResponseFormat::Json);
        assert_eq!(backend.requests()[0].messages[0].content, "Route: show my tickets");
    }

    #[tokio::test]
    async fn test_missing_route_keeps_raw() {
        let (harness, _) = harness(GenerationReply::Text(r#"{"answer": "support"}"#.into()));

        let output = harness.run(Arc::new(DecisionStage::new())).await;
        let failure = output.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Routing);
        assert_eq!(failure.raw.as_deref(), Some(r#"{"answer": "support"}"#));
        assert!(output.route.is_none());
    }

    #[tokio::test]
    async fn test_tool_calls_are_a_routing_failure() {
        let (harness, _) = harness(GenerationReply::ToolCalls(vec![ToolCallRequest {
            id: "c1".into(),
            name: "get_customer".into(),
            arguments: json!({}),
        }]));

        let output = harness.run(Arc::new(DecisionStage::new())).await;
        let failure = output.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Routing);
        assert!(failure.raw.unwrap().contains("get_customer"));
    }
}
