//! File-based store: one JSON document per session.
//!
//! Layout: `<dir>/<session_id>.json`. Each save writes a temp file and
//! renames it over the old one, so a crash never leaves a half-written
//! checkpoint. A `<session_id>.lock` file held for the duration of a save
//! keeps writers in different processes from interleaving.

use async_trait::async_trait;
use chrono::Utc;
use loopgate_core::checkpoint::{next_version, Checkpoint, CheckpointStore, SessionSummary};
use loopgate_core::error::CheckpointError;
use loopgate_core::message::SessionId;
use loopgate_core::state::LoopState;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock files older than this are left over from a crashed writer.
const STALE_LOCK: Duration = Duration::from_secs(30);

pub struct FileCheckpointStore {
    dir: PathBuf,
    // Serializes writers inside this process; the lock file covers the rest
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File checkpoint store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn file_for(&self, session_id: &SessionId) -> Result<PathBuf, CheckpointError> {
        Ok(self.dir.join(format!("{}.json", checked_id(session_id)?)))
    }

    fn lock_for(&self, session_id: &SessionId) -> Result<PathBuf, CheckpointError> {
        Ok(self.dir.join(format!("{}.lock", checked_id(session_id)?)))
    }

    async fn read(&self, path: &Path, session: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                session: session.to_string(),
                reason: e.to_string(),
            })
    }

    async fn acquire_file_lock(&self, lock: &Path, session: &str) -> Result<(), CheckpointError> {
        match create_lock(lock).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let stale = match tokio::fs::metadata(lock).await {
                    Ok(meta) => meta
                        .modified()
                        .ok()
                        .and_then(|t| t.elapsed().ok())
                        .is_some_and(|age| age > STALE_LOCK),
                    Err(_) => false,
                };
                if !stale {
                    return Err(CheckpointError::Conflict {
                        session: session.to_string(),
                        expected: None,
                        found: None,
                    });
                }
                warn!(session_id = %session, "Removing stale checkpoint lock");
                release_lock(lock, session).await;
                create_lock(lock).await.map_err(|e| {
                    CheckpointError::Storage(format!("Failed to take checkpoint lock: {e}"))
                })
            }
            Err(e) => Err(CheckpointError::Storage(format!(
                "Failed to take checkpoint lock: {e}"
            ))),
        }
    }

    async fn write_locked(
        &self,
        state: &LoopState,
        expected_version: Option<u64>,
        path: &Path,
    ) -> Result<u64, CheckpointError> {
        let session = state.session_id.to_string();
        let found = self.read(path, &session).await?.map(|cp| cp.version);
        let version = next_version(&state.session_id, expected_version, found)?;

        let checkpoint = Checkpoint {
            version,
            state: state.clone(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&checkpoint).map_err(|e| {
            CheckpointError::Storage(format!("Failed to serialize checkpoint: {e}"))
        })?;

        let tmp = self.dir.join(format!("{session}.json.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to write checkpoint file: {e}"))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to replace checkpoint file: {e}"))
        })?;

        debug!(session_id = %session, version, "Checkpoint saved");
        Ok(version)
    }
}

async fn create_lock(lock: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock)
        .await
        .map(|_| ())
}

/// A lock file that cannot be removed blocks later saves until it goes stale.
async fn release_lock(lock: &Path, session: &str) {
    if let Err(e) = tokio::fs::remove_file(lock).await {
        warn!(session_id = %session, error = %e, "Failed to remove checkpoint lock");
    }
}

/// Session ids become file names, so only allow a safe alphabet.
fn checked_id(session_id: &SessionId) -> Result<&str, CheckpointError> {
    let id = session_id.as_str();
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(CheckpointError::Storage(format!(
            "Session id '{id}' cannot be used as a file name"
        )))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.file_for(session_id)?;
        self.read(&path, session_id.as_str()).await
    }

    async fn save(
        &self,
        state: &LoopState,
        expected_version: Option<u64>,
    ) -> Result<u64, CheckpointError> {
        let path = self.file_for(&state.session_id)?;
        let lock = self.lock_for(&state.session_id)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to create checkpoint directory: {e}"))
        })?;

        let _guard = self.write_lock.lock().await;
        self.acquire_file_lock(&lock, state.session_id.as_str()).await?;
        let result = self.write_locked(state, expected_version, &path).await;
        release_lock(&lock, state.session_id.as_str()).await;
        result
    }

    async fn remove(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        let path = self.file_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::Storage(format!(
                "Failed to remove checkpoint: {e}"
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CheckpointError::Storage(format!(
                    "Failed to list checkpoints: {e}"
                )));
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let session = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            match self.read(&path, &session).await {
                Ok(Some(cp)) => summaries.push(SessionSummary::from(&cp)),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }

        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopgate_core::state::LoopPhase;

    fn state(id: &str) -> LoopState {
        LoopState::seed(SessionId::from(id), "search X and report")
    }

    #[tokio::test]
    async fn save_and_reload_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let mut s = state("session-1");
        s.phase = LoopPhase::AwaitingApproval {
            call_id: "c1".into(),
        };
        assert_eq!(store.save(&s, None).await.unwrap(), 1);

        // A fresh instance (e.g. after a restart) sees the same state
        let reopened = FileCheckpointStore::new(dir.path());
        let cp = reopened
            .load(&SessionId::from("session-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cp.version, 1);
        assert_eq!(cp.state.phase, s.phase);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let s = state("s1");
        store.save(&s, None).await.unwrap();
        assert_eq!(store.save(&s, Some(1)).await.unwrap(), 2);
        assert!(matches!(
            store.save(&s, Some(1)).await,
            Err(CheckpointError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn held_lock_blocks_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("s1.lock"), b"").unwrap();
        assert!(matches!(
            store.save(&state("s1"), None).await,
            Err(CheckpointError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let lock = dir.path().join("s1.lock");
        let file = std::fs::File::create(&lock).unwrap();
        file.set_modified(std::time::SystemTime::now() - STALE_LOCK * 2)
            .unwrap();
        drop(file);

        assert_eq!(store.save(&state("s1"), None).await.unwrap(), 1);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn conflicting_save_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let s = state("s1");
        store.save(&s, None).await.unwrap();
        assert!(store.save(&s, Some(7)).await.is_err());
        assert!(!dir.path().join("s1.lock").exists());
        assert_eq!(store.save(&s, Some(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{ not json").unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let err = store.load(&SessionId::from("bad")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));

        // list() skips it rather than failing
        store.save(&state("good"), None).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id.as_str(), "good");
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load(&SessionId::from("../etc/passwd")).await.is_err());
    }

    #[tokio::test]
    async fn missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("not-yet"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.remove(&SessionId::from("x")).await.unwrap());
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let s = state("s1");
        store.save(&s, None).await.unwrap();
        store.save(&s, Some(1)).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
    }
}
