//! Pipeline and stage specifications.

use crate::core::StageKind;
use crate::errors::PipelineValidationError;
use crate::generation::ResponseFormat;
use crate::stages::{DecisionStage, GenerationStage, Stage};
use crate::tools::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Text-generation settings for generation and decision stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model identifier; the services' default model when `None`.
    #[serde(default)]
    pub model: Option<String>,
    /// Instruction template, rendered against the session state.
    pub instruction: String,
    /// State key whose value is sent as the user message.
    #[serde(default)]
    pub input_key: Option<String>,
    /// Maximum backend round-trips that may request tool calls.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Output constraint.
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tool_rounds() -> usize {
    4
}

impl GenerationConfig {
    /// Creates a config with an instruction template.
    #[must_use]
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            model: None,
            instruction: instruction.into(),
            input_key: None,
            max_tool_rounds: default_max_tool_rounds(),
            response_format: ResponseFormat::Text,
            temperature: None,
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the user-message state key.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Sets the tool round bound.
    #[must_use]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
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
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// State keys that must be present before the stage runs.
    pub required_inputs: Vec<String>,
    /// State key the stage's value is written under.
    pub output_key: Option<String>,
    /// Tools the stage may call.
    pub capabilities: BTreeSet<ToolDescriptor>,
    /// Generation settings, for stages that drive a backend.
    pub generation: Option<GenerationConfig>,
    /// The kind of stage.
    pub kind: StageKind,
}

impl StageSpec {
    /// Creates a new stage specification; the kind comes from the runner.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        let kind = runner.kind();
        Self {
            name: name.into(),
            runner,
            required_inputs: Vec::new(),
            output_key: None,
            capabilities: BTreeSet::new(),
            generation: None,
            kind,
        }
    }

    /// Creates a generation stage.
    #[must_use]
    pub fn generation(name: impl Into<String>, config: GenerationConfig) -> Self {
        Self::new(name, Arc::new(GenerationStage::new())).with_generation(config)
    }

    /// Creates a decision stage; its output is always constrained to JSON.
    #[must_use]
    pub fn decision(name: impl Into<String>, config: GenerationConfig) -> Self {
        Self::new(name, Arc::new(DecisionStage::new()))
            .with_generation(config.with_response_format(ResponseFormat::Json))
    }

    /// Sets the required inputs.
    #[must_use]
    pub fn with_required_inputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_inputs = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Sets the tool capability set.
    #[must_use]
    pub fn with_capabilities(mut self, tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        self.capabilities = tools.into_iter().collect();
        self
    }

    /// Sets the generation settings.
    #[must_use]
    pub fn with_generation(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the stage lists its own
    /// output key as a required input.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if let Some(ref key) = self.output_key {
            if self.required_inputs.contains(key) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' requires its own output key '{key}'",
                    self.name
                ))
                .with_stages(vec![self.name.clone()]));
            }
        }
        Ok(())
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone)]
pub enum Step {
    /// Run one stage.
    Stage(StageSpec),
    /// Run a decision stage, then exactly the branch it names.
    Branch {
        /// The decision stage.
        decision: StageSpec,
        /// Branches keyed by route name.
        branches: BTreeMap<String, Vec<StageSpec>>,
    },
}

impl Step {
    /// Every stage spec in this step, decision first.
    #[must_use]
    pub fn stages(&self) -> Vec<&StageSpec> {
        match self {
            Self::Stage(spec) => vec![spec],
            Self::Branch { decision, branches } => std::iter::once(decision)
                .chain(branches.values().flatten())
                .collect(),
        }
    }
}

/// A validated, ordered pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// The pipeline name.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<Step>,
    /// State key holding the session result.
    pub output_key: String,
}

impl Pipeline {
    /// Names of all stages, in declaration order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(Step::stages)
            .map(|spec| spec.name.as_str())
            .collect()
    }

    /// Finds a stage spec by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.steps
            .iter()
            .flat_map(Step::stages)
            .find(|spec| spec.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PromptCaptureStage;

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new("capture", Arc::new(PromptCaptureStage::new("ask")))
            .with_required_inputs(["ask"])
            .with_output_key("capture_status");

        assert_eq!(spec.name, "capture");
        assert_eq!(spec.required_inputs, vec!["ask".to_string()]);
        assert_eq!(spec.kind, StageKind::Transform);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_stage_spec_requires_own_output() {
        let spec = StageSpec::new("loop", Arc::new(PromptCaptureStage::new("ask")))
            .with_required_inputs(["x"])
            .with_output_key("x");

        let err = spec.validate().unwrap_err();
        assert_eq!(err.stages, vec!["loop".to_string()]);
    }

    #[test]
    fn test_decision_spec_forces_json() {
        let spec = StageSpec::decision("router", GenerationConfig::new("route"));
        assert_eq!(spec.kind, StageKind::Route);
        assert_eq!(
            spec.generation.unwrap().response_format,
            ResponseFormat::Json
        );
    }

    #[test]
    fn test_generation_config_defaults() {
        let config: GenerationConfig = serde_json::from_str(r#"{"instruction": "hi"}"#).unwrap();
        assert_eq!(config.max_tool_rounds, 4);
        assert_eq!(config.response_format, ResponseFormat::Text);
        assert!(config.model.is_none());
    }
}
