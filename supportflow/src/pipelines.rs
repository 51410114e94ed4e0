//! Reference customer-support pipelines.

use crate::errors::PipelineValidationError;
use crate::pipeline::{GenerationConfig, Pipeline, PipelineBuilder, StageSpec};
use crate::stages::{
    PromptCaptureStage, ReplyStage, ToneClassificationStage, ToolStage, PRIORITY_KEY, PROMPT_KEY,
};
use crate::tools::ToolDescriptor;
use std::collections::BTreeSet;
use std::sync::Arc;

/// State key the caller puts the user's request under.
pub const ASK_KEY: &str = "ask";
/// State key holding tool findings.
pub const RESEARCH_KEY: &str = "research_data";
/// State key holding the router's payload.
pub const ROUTE_KEY: &str = "route";
/// State key holding the customer-facing answer.
pub const RESPONSE_KEY: &str = "response";

/// Branch name for customer data lookups.
pub const CUSTOMER_DATA_BRANCH: &str = "customer_data";
/// Branch name for general support questions.
pub const SUPPORT_BRANCH: &str = "support";

const ROUTER_INSTRUCTION: &str = r#"You are a router for a customer support team. You never answer the customer yourself.

Decide which specialist handles the request:
- "customer_data" for account lookups, ticket history, updating personal data or opening a ticket.
- "support" for general questions about products and services.

When you pick "customer_data", name exactly one tool and its parameters:
- get_customer {"customer_id": int}
- list_customers {"status": "active" | "disabled", "limit": int}
- update_customer {"customer_id": int, "field_name": str, "field_value": any}
- create_ticket {"customer_id": int, "issue": str, "priority": "low" | "medium" | "high"}
- get_customer_history {"customer_id": int}

The customer's id is {{ customer_id }} and their tone is {{ tone }}.

Answer with a single JSON object and nothing else:
{"next_stage": "<customer_data|support>", "payload": {"tool": "<name>", "params": {...}}}"#;

const CUSTOMER_DATA_INSTRUCTION: &str = "You are a helpful data analyst. Use the tools at your disposal to retrieve or update customer information based on the user's PROMPT.

- If the prompt asks for customer data or service history, use the query tools.
- If the prompt asks to change or add information, use the update or create tools.
- If the prompt is not related to customer data, do not call any tools.
- Summarize what you did and include the data you retrieved or altered.

Customer id, when known: {{ customer_id }}
Ticket priority for new tickets: {{ ticket_priority }}

PROMPT:
{{ PROMPT }}";

const SUPPORT_INSTRUCTION: &str = "You are the friendly customer-facing voice of the company. Take the RESEARCH_DATA and present it to the user in a complete and helpful answer.

- First present the specific information from the database, if any was provided.
- Then help with the questions the user raised, using that data.
- If some information is missing, present what you have.
- Be conversational and engaging.

RESEARCH_DATA:
{{ research_data }}";

fn capture_stage() -> StageSpec {
    StageSpec::new("capture", Arc::new(PromptCaptureStage::new(ASK_KEY))).with_required_inputs([ASK_KEY])
}

fn support_stage() -> StageSpec {
    StageSpec::generation(
        "support",
        GenerationConfig::new(SUPPORT_INSTRUCTION).with_input_key(PROMPT_KEY),
    )
    .with_required_inputs([PROMPT_KEY])
    .with_output_key(RESPONSE_KEY)
}

/// Capture, research with tools, then answer.
///
/// # Errors
///
/// Returns an error only if the fixed layout fails validation.
pub fn sequential_support(allow: BTreeSet<ToolDescriptor>) -> Result<Pipeline, PipelineValidationError> {
    PipelineBuilder::new("sequential_support")
        .stage(capture_stage())
        .stage(
            StageSpec::generation(
                "customer_data",
                GenerationConfig::new(CUSTOMER_DATA_INSTRUCTION).with_input_key(PROMPT_KEY),
            )
            .with_required_inputs([PROMPT_KEY])
            .with_capabilities(allow)
            .with_output_key(RESEARCH_KEY),
        )
        .stage(support_stage())
        .output_key(RESPONSE_KEY)
        .build()
}

/// Capture, classify tone, route, then run exactly one branch.
///
/// The `customer_data` branch performs the router's tool request and
/// replies deterministically; the `support` branch answers with the
/// generation backend.
///
/// # Errors
///
/// Returns an error only if the fixed layout fails validation.
pub fn routed_support() -> Result<Pipeline, PipelineValidationError> {
    let router = StageSpec::decision(
        "router",
        GenerationConfig::new(ROUTER_INSTRUCTION)
            .with_input_key(PROMPT_KEY)
            .with_temperature(0.2),
    )
    .with_required_inputs([PROMPT_KEY, PRIORITY_KEY])
    .with_output_key(ROUTE_KEY);

    let lookup = StageSpec::new("lookup", Arc::new(ToolStage::from_state(ROUTE_KEY)))
        .with_required_inputs([ROUTE_KEY])
        .with_capabilities(ToolDescriptor::ALL)
        .with_output_key(RESEARCH_KEY);
    let reply = StageSpec::new("reply", Arc::new(ReplyStage::new(RESEARCH_KEY)))
        .with_required_inputs([RESEARCH_KEY])
        .with_output_key(RESPONSE_KEY);

    PipelineBuilder::new("routed_support")
        .stage(capture_stage())
        .stage(
            StageSpec::new("tone", Arc::new(ToneClassificationStage::default()))
                .with_required_inputs([PROMPT_KEY]),
        )
        .branch(
            router,
            [
                (CUSTOMER_DATA_BRANCH, vec![lookup, reply]),
                (SUPPORT_BRANCH, vec![support_stage()]),
            ],
        )
        .output_key(RESPONSE_KEY)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_routed_layout() {
        let pipeline = routed_support().unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["capture", "tone", "router", "lookup", "reply", "support"]
        );
        assert_eq!(pipeline.stage("router").unwrap().kind, StageKind::Route);
        assert_eq!(pipeline.output_key, RESPONSE_KEY);
    }

    #[test]
    fn test_sequential_layout_carries_allow_list() {
        let allow: BTreeSet<_> = [ToolDescriptor::GetCustomer, ToolDescriptor::GetCustomerHistory].into();
        let pipeline = sequential_support(allow.clone()).unwrap();

        assert_eq!(pipeline.stage_names(), vec!["capture", "customer_data", "support"]);
        let research = pipeline.stage("customer_data").unwrap();
        assert_eq!(research.capabilities, allow);
        assert_eq!(research.kind, StageKind::Agent);
        assert!(research.generation.as_ref().unwrap().instruction.contains("{{ PROMPT }}"));
    }
}
