//! CheckpointStore trait: durable LoopState keyed by session id.
//!
//! Writes are versioned: `save` names the version it expects to replace,
//! so two writers racing on one session cannot both win. That is what
//! makes a pending approval resumable exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::message::SessionId;
use crate::state::LoopState;

/// A stored LoopState and its version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u64,
    pub state: LoopState,
    pub saved_at: DateTime<Utc>,
}

/// One line of `list()` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub phase: String,
    pub version: u64,
    pub turns: u32,
    pub saved_at: DateTime<Utc>,
}

impl From<&Checkpoint> for SessionSummary {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            session_id: cp.state.session_id.clone(),
            phase: cp.state.phase.name().to_string(),
            version: cp.version,
            turns: cp.state.turns,
            saved_at: cp.saved_at,
        }
    }
}

/// Check `expected` against what is stored and return the next version.
pub fn next_version(
    session: &SessionId,
    expected: Option<u64>,
    found: Option<u64>,
) -> Result<u64, CheckpointError> {
    match (expected, found) {
        (None, None) => Ok(1),
        (Some(e), Some(f)) if e == f => Ok(f + 1),
        _ => Err(CheckpointError::Conflict {
            session: session.to_string(),
            expected,
            found,
        }),
    }
}

/// The core CheckpointStore trait.
///
/// Implementations: in-memory (tests, single process) and JSON files
/// (survives restarts).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Load the latest checkpoint for a session.
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Persist `state`. `expected_version` is `None` to create a new
    /// session, or the version last loaded. Returns the new version.
    async fn save(
        &self,
        state: &LoopState,
        expected_version: Option<u64>,
    ) -> Result<u64, CheckpointError>;

    /// Delete a session. Returns whether it existed.
    async fn remove(&self, session_id: &SessionId) -> Result<bool, CheckpointError>;

    /// Summaries of all stored sessions, most recent first.
    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError>;
}
