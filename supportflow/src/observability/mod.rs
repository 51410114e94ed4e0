//! Observability utilities.

mod tracing;

pub use self::tracing::{init_tracing, session_span, stage_span, LogFormat, SpanTimer};
