//! Execution context for stages.
//!
//! This module provides:
//! - [`Services`], the explicit bundle of shared collaborators
//! - [`StageContext`], the borrowed view a stage runs against

mod services;
mod stage;

pub use services::Services;
pub use stage::StageContext;
