//! Stage trait and implementations.
//!
//! Stages are the units of work in a supportflow pipeline. A stage reads
//! the session state through its [`StageContext`] and returns a
//! [`StageOutput`]; it never mutates state directly.

mod decision;
mod generation;
mod prompt;
mod reply;
mod tool;

pub use decision::DecisionStage;
pub use generation::GenerationStage;
pub use prompt::{
    priority_for_tone, PromptCaptureStage, Tone, ToneClassificationStage, PRIORITY_KEY, PROMPT_KEY,
    TONE_KEY,
};
pub use reply::{compose_reply, ReplyStage};
pub use tool::{ToolStage, CUSTOMER_ID_KEY};

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage implementation.
    fn name(&self) -> &str;

    /// Returns the kind of work the stage performs.
    fn kind(&self) -> StageKind {
        StageKind::Work
    }

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The stage output indicating success, failure or cancellation.
    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput;
}

/// A simple function-based stage for bounded, synchronous computations.
pub struct FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageOutput + Send + Sync,
{
    name: String,
    kind: StageKind,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            kind: StageKind::Transform,
            func,
        }
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext<'_>) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        (self.func)(ctx)
    }
}
