//! # Supportflow
//!
//! Stateful stage pipelines for customer-support workflows.
//!
//! A session carries a user's request through an ordered list of stages.
//! Stages read a per-session [`state::StateStore`], may call a generation
//! backend, and may call allow-listed tools on a remote JSON-RPC endpoint
//! through an authenticated [`tools::ToolClient`]. Decision stages pick
//! which branch of the pipeline runs next.
//!
//! - **Stages**: generation, pure-function, tool and decision variants
//! - **Tool client**: bearer tokens per audience, retry with backoff,
//!   per-call timeouts and pooled keep-alive connections
//! - **Executor**: many concurrent sessions, each strictly sequential,
//!   with cancellation and a session deadline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use supportflow::prelude::*;
//!
//! let pipeline = routed_support()?;
//! let executor = PipelineExecutor::new(Arc::new(services));
//!
//! let mut state = StateStore::new();
//! state.set("customer_id", 3);
//! state.set("ask", "show my tickets");
//!
//! let outcome = executor
//!     .execute(&pipeline, "session-1", state, &CancellationToken::new())
//!     .await?;
//! println!("{}", outcome.output);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod directory;
pub mod errors;
pub mod events;
pub mod generation;
pub mod observability;
pub mod pipeline;
pub mod pipelines;
pub mod retry;
pub mod stages;
pub mod state;
pub mod testing;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{MetadataTokenSource, StaticTokenSource, TokenProvider, TokenSource};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AppConfig, ToolClientConfig};
    pub use crate::context::{Services, StageContext};
    pub use crate::core::{RoutingResult, StageKind, StageOutput, StageStatus};
    pub use crate::errors::{
        FailureDescriptor, FailureKind, PipelineValidationError, SupportflowError, ToolError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::generation::{GenerationBackend, OpenAiChatBackend};
    pub use crate::pipeline::{
        GenerationConfig, Pipeline, PipelineBuilder, PipelineExecutor, SessionOutcome, StageSpec,
    };
    pub use crate::pipelines::{routed_support, sequential_support};
    pub use crate::stages::{FnStage, Stage};
    pub use crate::state::{Session, StateStore};
    pub use crate::tools::{ToolClient, ToolDescriptor, ToolResponse};
    pub use std::sync::Arc;
}
