//! Test assertions for stage outputs and session results.

use crate::core::{StageOutput, StageStatus};
use crate::errors::{FailureDescriptor, FailureKind};

/// Asserts that the output indicates success.
pub fn assert_output_succeeded(output: &StageOutput) {
    assert!(
        output.is_success(),
        "Expected success, got status: {:?} ({:?})",
        output.status,
        output.failure
    );
}

/// Asserts that the output indicates failure.
pub fn assert_output_failed(output: &StageOutput) {
    assert!(
        output.is_failure(),
        "Expected failure, got status: {:?}",
        output.status
    );
}

/// Asserts that the output has the expected status.
pub fn assert_output_status(output: &StageOutput, expected: StageStatus) {
    assert_eq!(
        output.status, expected,
        "Expected status {:?}, got {:?}",
        expected, output.status
    );
}

/// Asserts that a session failed with the expected kind.
pub fn assert_failure_kind<T: std::fmt::Debug>(
    result: &Result<T, FailureDescriptor>,
    expected: FailureKind,
) -> &FailureDescriptor {
    match result {
        Err(descriptor) => {
            assert_eq!(
                descriptor.kind, expected,
                "Expected {expected} failure, got {descriptor}"
            );
            descriptor
        }
        Ok(value) => panic!("Expected {expected} failure, got success: {value:?}"),
    }
}
