//! In-memory store: useful for tests and single-process hosts.

use async_trait::async_trait;
use chrono::Utc;
use loopgate_core::checkpoint::{next_version, Checkpoint, CheckpointStore, SessionSummary};
use loopgate_core::error::CheckpointError;
use loopgate_core::message::SessionId;
use loopgate_core::state::LoopState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps checkpoints in a map. Lost when the process exits.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    entries: Arc<RwLock<HashMap<SessionId, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.entries.read().await.get(session_id).cloned())
    }

    async fn save(
        &self,
        state: &LoopState,
        expected_version: Option<u64>,
    ) -> Result<u64, CheckpointError> {
        // Check and write under one lock so racing writers serialize
        let mut entries = self.entries.write().await;
        let found = entries.get(&state.session_id).map(|cp| cp.version);
        let version = next_version(&state.session_id, expected_version, found)?;
        entries.insert(
            state.session_id.clone(),
            Checkpoint {
                version,
                state: state.clone(),
                saved_at: Utc::now(),
            },
        );
        Ok(version)
    }

    async fn remove(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        Ok(self.entries.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let entries = self.entries.read().await;
        let mut summaries: Vec<SessionSummary> = entries.values().map(SessionSummary::from).collect();
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> LoopState {
        LoopState::seed(SessionId::from(id), "hello")
    }

    #[tokio::test]
    async fn save_and_load() {
        let store = InMemoryCheckpointStore::new();
        let v1 = store.save(&state("s1"), None).await.unwrap();
        assert_eq!(v1, 1);

        let cp = store.load(&SessionId::from("s1")).await.unwrap().unwrap();
        assert_eq!(cp.version, 1);
        assert_eq!(cp.state.conversation.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let store = InMemoryCheckpointStore::new();
        let s = state("s1");
        store.save(&s, None).await.unwrap();
        store.save(&s, Some(1)).await.unwrap();

        let err = store.save(&s, Some(1)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Conflict { found: Some(2), .. }));
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = InMemoryCheckpointStore::new();
        store.save(&state("s1"), None).await.unwrap();
        assert!(store.save(&state("s1"), None).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_writers_one_wins() {
        let store = InMemoryCheckpointStore::new();
        let s = state("s1");
        store.save(&s, None).await.unwrap();

        let (a, b) = tokio::join!(store.save(&s, Some(1)), store.save(&s, Some(1)));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn remove_and_list() {
        let store = InMemoryCheckpointStore::new();
        store.save(&state("a"), None).await.unwrap();
        store.save(&state("b"), None).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.remove(&SessionId::from("a")).await.unwrap());
        assert!(!store.remove(&SessionId::from("a")).await.unwrap());
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].session_id.as_str(), "b");
    }

    #[tokio::test]
    async fn unknown_session_loads_none() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load(&SessionId::from("nope")).await.unwrap().is_none());
    }
}
