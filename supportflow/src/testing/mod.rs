//! Testing utilities for supportflow pipelines.
//!
//! This module provides:
//! - Mock stages, a scripted generation backend and a flaky transport
//! - A stage harness and in-process tool clients
//! - Assertions for stage outputs and session failures

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_failure_kind, assert_output_failed, assert_output_status, assert_output_succeeded,
};
pub use fixtures::{local_tool_client, sample_tool_client, StageHarness, SAMPLE_ENDPOINT};
pub use mocks::{FlakyTransport, MockStage, ScriptedBackend, SlowStage};
