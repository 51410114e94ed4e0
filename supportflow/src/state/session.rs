//! Sessions and the registry that keeps one run per session id.

use crate::errors::SupportflowError;
use crate::state::StateStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "stage", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not yet run.
    Created,
    /// Running the named stage.
    Running(String),
    /// Finished successfully.
    Completed,
    /// Halted at the named stage.
    Failed(String),
}

impl SessionStatus {
    /// Returns true once the session can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running(stage) => write!(f, "running({stage})"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// One user request flowing through a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: String,
    /// Exclusively owned state.
    pub state: StateStore,
    /// Current lifecycle status.
    pub status: SessionStatus,
}

impl Session {
    /// Creates a new session with a generated id.
    #[must_use]
    pub fn new(state: StateStore) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), state)
    }

    /// Creates a new session with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, state: StateStore) -> Self {
        Self {
            id: id.into(),
            state,
            status: SessionStatus::Created,
        }
    }
}

/// Tracks which session ids are currently running.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashMap<String, ()>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as running.
    ///
    /// # Errors
    ///
    /// Returns [`SupportflowError::SessionBusy`] if the id is already running.
    pub fn begin(self: &Arc<Self>, id: &str) -> Result<SessionGuard, SupportflowError> {
        match self.active.entry(id.to_string()) {
            Entry::Occupied(_) => Err(SupportflowError::SessionBusy(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(SessionGuard {
                    registry: Arc::clone(self),
                    id: id.to_string(),
                })
            }
        }
    }

    /// Returns true if `id` is currently running.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Number of running sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Releases a session id when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    /// The guarded session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.active.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_created() {
        let session = Session::new(StateStore::new());
        assert_eq!(session.status, SessionStatus::Created);
        assert!(!session.id.is_empty());
        assert!(!session.status.is_terminal());
    }

    #[test]
    fn test_registry_rejects_duplicate_run() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.begin("s-1").unwrap();

        let err = registry.begin("s-1").unwrap_err();
        assert!(matches!(err, SupportflowError::SessionBusy(ref id) if id == "s-1"));
        assert!(registry.begin("s-2").is_ok());

        drop(guard);
        assert!(!registry.is_active("s-1"));
        assert!(registry.begin("s-1").is_ok());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Running("router".into()).to_string(), "running(router)");
        assert!(SessionStatus::Failed("router".into()).is_terminal());
    }
}
