//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Reshapes input without external calls (e.g. prompt capture, reply formatting).
    Transform,
    /// Adds derived context (e.g. tone classification).
    Enrich,
    /// Selects the next branch (decision stages).
    Route,
    /// Performs a tool call.
    #[default]
    Work,
    /// Drives a generation backend, possibly calling tools.
    Agent,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => write!(f, "transform"),
            Self::Enrich => write!(f, "enrich"),
            Self::Route => write!(f, "route"),
            Self::Work => write!(f, "work"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage was cancelled.
    Cancel,
    /// Stage failed.
    Fail,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Cancel => write!(f, "cancel"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Work.to_string(), "work");
        assert_eq!(StageKind::Route.to_string(), "route");
        assert_eq!(StageKind::Transform.to_string(), "transform");
        assert_eq!(StageKind::Enrich.to_string(), "enrich");
        assert_eq!(StageKind::Agent.to_string(), "agent");
    }

    #[test]
    fn test_stage_kind_default() {
        assert_eq!(StageKind::default(), StageKind::Work);
    }

    #[test]
    fn test_stage_status_predicates() {
        assert!(StageStatus::Ok.is_success());
        assert!(!StageStatus::Ok.is_failure());
        assert!(StageStatus::Fail.is_failure());
        assert!(StageStatus::Cancel.is_failure());
    }

    #[test]
    fn test_stage_status_serde() {
        assert_eq!(serde_json::to_string(&StageStatus::Cancel).unwrap(), "\"cancel\"");
        let kind: StageKind = serde_json::from_str("\"route\"").unwrap();
        assert_eq!(kind, StageKind::Route);
    }
}
