//! Pipeline builder with validation.

use super::{Pipeline, StageSpec, Step};
use crate::core::StageKind;
use crate::errors::PipelineValidationError;
use std::collections::{BTreeMap, HashSet};

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Steps in insertion order.
    steps: Vec<Step>,
    /// State key holding the result.
    output_key: Option<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            output_key: None,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.steps.push(Step::Stage(spec));
        self
    }

    /// Appends a decision stage followed by its branches.
    #[must_use]
    pub fn branch<I, K>(mut self, decision: StageSpec, branches: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<StageSpec>)>,
        K: Into<String>,
    {
        let branches: BTreeMap<String, Vec<StageSpec>> =
            branches.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.steps.push(Step::Branch { decision, branches });
        self
    }

    /// Sets the state key holding the session result.
    #[must_use]
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages across all steps and branches.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.steps.iter().map(|step| step.stages().len()).sum()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, has no output key, reuses
    /// a stage name, declares an empty branch, or uses a non-route stage as
    /// a decision.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }
        if self.steps.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages"));
        }
        let output_key = self
            .output_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PipelineValidationError::new("Pipeline has no output key"))?;

        let mut seen = HashSet::new();
        for step in &self.steps {
            if let Step::Branch { decision, branches } = step {
                if decision.kind != StageKind::Route {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' is used as a decision but has kind '{}'",
                        decision.name, decision.kind
                    ))
                    .with_stages(vec![decision.name.clone()]));
                }
                if branches.is_empty() {
                    return Err(PipelineValidationError::new(format!(
                        "Decision '{}' has no branches",
                        decision.name
                    ))
                    .with_stages(vec![decision.name.clone()]));
                }
                if let Some((route, _)) = branches.iter().find(|(_, stages)| stages.is_empty()) {
                    return Err(PipelineValidationError::new(format!(
                        "Branch '{route}' of decision '{}' has no stages",
                        decision.name
                    ))
                    .with_stages(vec![decision.name.clone()]));
                }
            }

            for spec in step.stages() {
                spec.validate()?;
                if !seen.insert(spec.name.clone()) {
                    return Err(PipelineValidationError::new(format!(
                        "Duplicate stage name '{}'",
                        spec.name
                    ))
                    .with_stages(vec![spec.name.clone()]));
                }
            }
        }

        Ok(Pipeline {
            name: self.name,
            steps: self.steps,
            output_key,
        })
    }
}
