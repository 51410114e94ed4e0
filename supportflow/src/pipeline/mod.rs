//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage and pipeline specifications
//! - Pipeline builder with validation
//! - The session executor

mod builder;
mod executor;
mod spec;


pub use builder::PipelineBuilder;
pub use executor::{PipelineExecutor, SessionOutcome};
pub use spec::{GenerationConfig, Pipeline, StageSpec, Step};
