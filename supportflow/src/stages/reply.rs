//! Deterministic reply composed from a tool stage's result.

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::FailureKind;
use crate::stages::Stage;
use crate::tools::{Customer, Ticket, ToolDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;

/// Turns `{tool, params, result | error}` into customer-facing text.
#[derive(Debug, Clone)]
pub struct ReplyStage {
    source_key: String,
}

impl ReplyStage {
    /// Creates a stage replying from the value at `source_key`.
    #[must_use]
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
        }
    }
}

#[async_trait]
impl Stage for ReplyStage {
    fn name(&self) -> &str {
        "reply"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let Some(research) = ctx.state().get(&self.source_key) else {
            return StageOutput::fail(
                FailureKind::Configuration,
                format!("Missing research data under '{}'", self.source_key),
            );
        };
        match compose_reply(research) {
            Ok(text) => StageOutput::ok_value(text),
            Err(message) => StageOutput::fail(FailureKind::Configuration, message),
        }
    }
}

/// Builds the reply text for one tool result.
///
/// # Errors
///
/// Returns a message when the research data does not name a known tool or
/// its result has an unexpected shape.
pub fn compose_reply(research: &Value) -> Result<String, String> {
    let tool = research
        .get("tool")
        .and_then(Value::as_str)
        .and_then(ToolDescriptor::from_name)
        .ok_or_else(|| format!("Research data names no known tool: {research}"))?;
    let customer_id = research
        .pointer("/params/customer_id")
        .map(|id| id.to_string())
        .unwrap_or_default();

    if let Some(reason) = research.get("error").and_then(Value::as_str) {
        return Ok(format!(
            "Sorry, your request could not be completed: {reason}"
        ));
    }

    let result = research.get("result").cloned().unwrap_or(Value::Null);
    let invalid = |e: serde_json::Error| format!("Unexpected {tool} result: {e}");

    let text = match tool {
        ToolDescriptor::GetCustomerHistory => {
            let tickets: Vec<Ticket> = serde_json::from_value(result).map_err(invalid)?;
            if tickets.is_empty() {
                format!("No tickets were found for customer {customer_id}.")
            } else {
                let mut text = format!(
                    "Customer {customer_id} has {} ticket(s), most recent first:",
                    tickets.len()
                );
                for ticket in &tickets {
                    let _ = write!(
                        text,
                        "\n- #{} [{}] {} ({} priority, opened {})",
                        ticket.id, ticket.status, ticket.issue, ticket.priority, ticket.created_at
                    );
                }
                text
            }
        }
        ToolDescriptor::GetCustomer => {
            let customer: Option<Customer> = serde_json::from_value(result).map_err(invalid)?;
            match customer {
                None => format!("No customer was found with id {customer_id}."),
                Some(c) => format!(
                    "Customer {}: {} ({}), email {}, phone {}.",
                    c.id,
                    c.name,
                    c.status,
                    c.email.as_deref().unwrap_or("not on file"),
                    c.phone.as_deref().unwrap_or("not on file"),
                ),
            }
        }
        ToolDescriptor::ListCustomers => {
            let customers: Vec<Customer> = serde_json::from_value(result).map_err(invalid)?;
            if customers.is_empty() {
                "No customers matched.".to_string()
            } else {
                let mut text = format!("Found {} customer(s):", customers.len());
                for c in &customers {
                    let _ = write!(text, "\n- #{} {} ({})", c.id, c.name, c.status);
                }
                text
            }
        }
        ToolDescriptor::UpdateCustomer => result
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| "Your details were updated.".to_string(), str::to_string),
        ToolDescriptor::CreateTicket => {
            let ticket: Ticket = serde_json::from_value(result).map_err(invalid)?;
            format!(
                "Ticket #{} was opened with {} priority: {}",
                ticket.id, ticket.priority, ticket.issue
            )
        }
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StageHarness;
    use serde_json::json;
    use std::sync::Arc;

    fn ticket(id: i64, issue: &str) -> Value {
        json!({
            "id": id, "customer_id": 3, "issue": issue, "status": "open",
            "priority": "high", "created_at": "2024-01-02T00:00:00.000000Z"
        })
    }

    #[test]
    fn test_history_lists_tickets() {
        let research = json!({
            "tool": "get_customer_history",
            "params": {"customer_id": 3},
            "result": [ticket(7, "Refund not received"), ticket(2, "Login loop")]
        });
        let text = compose_reply(&research).unwrap();
        assert!(text.starts_with("Customer 3 has 2 ticket(s)"));
        assert!(text.contains("#7 [open] Refund not received"));
        assert!(text.find("#7").unwrap() < text.find("#2").unwrap());
    }

    #[test]
    fn test_empty_history() {
        let research = json!({"tool": "get_customer_history", "params": {"customer_id": 4}, "result": []});
        assert_eq!(compose_reply(&research).unwrap(), "No tickets were found for customer 4.");
    }

    #[test]
    fn test_missing_customer() {
        let research = json!({"tool": "get_customer", "params": {"customer_id": 99}, "result": null});
        assert_eq!(compose_reply(&research).unwrap(), "No customer was found with id 99.");
    }

    #[test]
    fn test_rejection_surfaced() {
        let research = json!({"tool": "update_customer", "params": {}, "error": "Invalid status value."});
        assert_eq!(
            compose_reply(&research).unwrap(),
            "Sorry, your request could not be completed: Invalid status value."
        );
    }

    #[test]
    fn test_unknown_tool_is_error() {
        assert!(compose_reply(&json!({"tool": "drop_tables"})).is_err());
    }

    #[tokio::test]
    async fn test_stage_reads_source_key() {
        let harness = StageHarness::new().with_state(
            "research_data",
            json!({"tool": "update_customer", "params": {}, "result": {"success": true, "message": "Customer 2 updated."}}),
        );
        let output = harness.run(Arc::new(ReplyStage::new("research_data"))).await;
        assert_eq!(output.value, Some(json!("Customer 2 updated.")));
    }

    #[tokio::test]
    async fn test_stage_missing_source_fails() {
        let output = StageHarness::new().run(Arc::new(ReplyStage::new("research_data"))).await;
        assert_eq!(output.failure.unwrap().kind, FailureKind::Configuration);
    }
}
