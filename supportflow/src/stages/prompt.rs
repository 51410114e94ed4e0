//! Pure-function stages: prompt capture and tone classification.

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::FailureKind;
use crate::stages::Stage;
use crate::tools::TicketPriority;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::info;

/// State key the captured prompt is written to.
pub const PROMPT_KEY: &str = "PROMPT";
/// State key the detected tone is written to.
pub const TONE_KEY: &str = "tone";
/// State key the derived ticket priority is written to.
pub const PRIORITY_KEY: &str = "ticket_priority";

/// Copies the user's request into `PROMPT`.
#[derive(Debug, Clone)]
pub struct PromptCaptureStage {
    input_key: String,
}

impl PromptCaptureStage {
    /// Creates a stage reading the request from `input_key`.
    #[must_use]
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
        }
    }
}

#[async_trait]
impl Stage for PromptCaptureStage {
    fn name(&self) -> &str {
        "prompt_capture"
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        if !ctx.state().contains_key(&self.input_key) {
            return StageOutput::fail(
                FailureKind::Configuration,
                format!("Missing required state key '{}'", self.input_key),
            );
        }

        let prompt = ctx.state().render_value(&self.input_key);
        info!(session_id = %ctx.session_id(), chars = prompt.len(), "[State updated] Added to PROMPT");

        StageOutput::ok_value(json!({"status": "success"})).with_write(PROMPT_KEY, prompt)
    }
}

/// Emotional tone of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    /// The customer is upset.
    Frustrated,
    /// The request is time-critical.
    Urgent,
    /// Something is wrong but the customer is calm.
    Negative,
    /// Nothing notable.
    Neutral,
}

impl Tone {
    /// The wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frustrated => "frustrated",
            Self::Urgent => "urgent",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    /// Classifies text by keyword.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        const FRUSTRATED: &[&str] = &[
            "frustrat", "angry", "furious", "ridiculous", "unacceptable", "annoyed", "fed up",
            "terrible", "worst",
        ];
        const URGENT: &[&str] = &["urgent", "asap", "immediately", "right now", "emergency"];
        const NEGATIVE: &[&str] = &[
            "not working", "broken", "problem", "issue", "error", "fail", "wrong", "can't",
            "cannot", "unable", "refund",
        ];

        let lower = text.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if any(FRUSTRATED) {
            Self::Frustrated
        } else if any(URGENT) {
            Self::Urgent
        } else if any(NEGATIVE) {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a tone to the priority of any ticket it leads to.
#[must_use]
pub fn priority_for_tone(tone: Tone) -> TicketPriority {
    match tone {
        Tone::Frustrated | Tone::Urgent => TicketPriority::High,
        Tone::Negative => TicketPriority::Medium,
        Tone::Neutral => TicketPriority::Low,
    }
}

/// Classifies the prompt's tone and derives a ticket priority.
///
/// Writes `tone` and `ticket_priority`; never calls tools.
#[derive(Debug, Clone)]
pub struct ToneClassificationStage {
    input_key: String,
}

impl ToneClassificationStage {
    /// Creates a stage classifying the value at `input_key`.
    #[must_use]
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
        }
    }
}

impl Default for ToneClassificationStage {
    fn default() -> Self {
        Self::new(PROMPT_KEY)
    }
}

#[async_trait]
impl Stage for ToneClassificationStage {
    fn name(&self) -> &str {
        "tone_classification"
    }

    fn kind(&self) -> StageKind {
        StageKind::Enrich
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let text = ctx.state().render_value(&self.input_key);
        let tone = Tone::classify(&text);
        let priority = priority_for_tone(tone);

        info!(session_id = %ctx.session_id(), tone = %tone, priority = %priority, "Classified tone");
        StageOutput::ok_value(json!({"tone": tone, "ticket_priority": priority}))
            .with_write(TONE_KEY, tone.as_str())
            .with_write(PRIORITY_KEY, priority.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StageHarness;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_tone_classification_keywords() {
        assert_eq!(Tone::classify("This is RIDICULOUS, third time!"), Tone::Frustrated);
        assert_eq!(Tone::classify("Please fix ASAP"), Tone::Urgent);
        assert_eq!(Tone::classify("My login is broken"), Tone::Negative);
        assert_eq!(Tone::classify("show my tickets"), Tone::Neutral);
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(priority_for_tone(Tone::Frustrated), TicketPriority::High);
        assert_eq!(priority_for_tone(Tone::Urgent), TicketPriority::High);
        assert_eq!(priority_for_tone(Tone::Negative), TicketPriority::Medium);
        assert_eq!(priority_for_tone(Tone::Neutral), TicketPriority::Low);
    }

    #[tokio::test]
    async fn test_prompt_capture_writes_prompt() {
        let harness = StageHarness::new().with_state("ask", json!("show my tickets"));
        let output = harness.run(Arc::new(PromptCaptureStage::new("ask"))).await;

        assert!(output.is_success());
        assert_eq!(output.value, Some(json!({"status": "success"})));
        assert_eq!(output.writes.get(PROMPT_KEY), Some(&json!("show my tickets")));
    }

    #[tokio::test]
    async fn test_prompt_capture_missing_input() {
        let output = StageHarness::new()
            .run(Arc::new(PromptCaptureStage::new("ask")))
            .await;
        assert_eq!(output.failure.unwrap().kind, FailureKind::Configuration);
    }

    #[tokio::test]
    async fn test_tone_stage_writes_priority() {
        let harness = StageHarness::new().with_state(PROMPT_KEY, json!("I need this fixed immediately"));
        let output = harness.run(Arc::new(ToneClassificationStage::default())).await;

        assert_eq!(output.writes.get(TONE_KEY), Some(&json!("urgent")));
        assert_eq!(output.writes.get(PRIORITY_KEY), Some(&json!("high")));
    }
}
