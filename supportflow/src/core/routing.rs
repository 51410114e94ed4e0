//! Routing decisions parsed from generation output.

use crate::errors::RoutingParseError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The branch a decision stage selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingResult {
    /// Name of the branch to run next.
    pub next_stage: String,
    /// Data handed to the chosen branch.
    pub payload: Value,
}

impl RoutingResult {
    /// Creates a new routing result.
    #[must_use]
    pub fn new(next_stage: impl Into<String>, payload: Value) -> Self {
        Self {
            next_stage: next_stage.into(),
            payload,
        }
    }
}

/// Parses backend output into a [`RoutingResult`].
///
/// Accepts a JSON object, optionally wrapped in a Markdown code fence. The
/// route comes from `next_stage` or `next_agent`; the payload is the
/// `payload` field when present, otherwise every other field.
///
/// # Errors
///
/// Returns a [`RoutingParseError`] carrying `raw` when the text is not a JSON
/// object or names no route. No default route is ever guessed.
pub fn parse_routing_result(raw: &str) -> Result<RoutingResult, RoutingParseError> {
    let body = strip_code_fence(raw);

    let value: Value = serde_json::from_str(body)
        .map_err(|e| RoutingParseError::new(format!("not valid JSON: {e}"), raw))?;

    let Value::Object(mut fields) = value else {
        return Err(RoutingParseError::new("expected a JSON object", raw));
    };

    let next_stage = take_route(&mut fields, "next_stage")
        .or_else(|| take_route(&mut fields, "next_agent"))
        .ok_or_else(|| RoutingParseError::new("missing next_stage or next_agent", raw))?;

    let payload = match fields.remove("payload") {
        Some(payload) => payload,
        None => Value::Object(fields),
    };

    Ok(RoutingResult { next_stage, payload })
}

fn take_route(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    let route = fields.get(key)?.as_str()?.trim().to_string();
    if route.is_empty() {
        return None;
    }
    fields.remove(key);
    Some(route)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_next_stage_with_payload() {
        let result = parse_routing_result(
            r#"{"next_stage": "customer_data", "payload": {"tool": "get_customer_history"}}"#,
        )
        .unwrap();
        assert_eq!(result.next_stage, "customer_data");
        assert_eq!(result.payload, json!({"tool": "get_customer_history"}));
    }

    #[test]
    fn test_parse_next_agent_uses_remaining_fields() {
        let result = parse_routing_result(
            r#"{"next_agent": "support", "task": "answer", "data": {"customer_id": 3}}"#,
        )
        .unwrap();
        assert_eq!(result.next_stage, "support");
        assert_eq!(result.payload, json!({"task": "answer", "data": {"customer_id": 3}}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"next_stage\": \"support\"}\n```";
        let result = parse_routing_result(raw).unwrap();
        assert_eq!(result.next_stage, "support");
        assert_eq!(result.payload, json!({}));
    }

    #[test]
    fn test_missing_route_field_keeps_raw() {
        let raw = r#"{"task": "lookup"}"#;
        let err = parse_routing_result(raw).unwrap_err();
        assert_eq!(err.raw, raw);
        assert!(err.reason.contains("next_stage"));
    }

    #[test]
    fn test_non_json_and_non_object_fail() {
        let err = parse_routing_result("Route to customer data please").unwrap_err();
        assert_eq!(err.raw, "Route to customer data please");

        assert!(parse_routing_result(r#"["support"]"#).is_err());
        assert!(parse_routing_result(r#"{"next_stage": ""}"#).is_err());
        assert!(parse_routing_result(r#"{"next_stage": 7}"#).is_err());
    }
}
