//! `runs/<runId>.json`: the full, unbounded per-run payload (every
//! harness event plus final output), as opposed to the bounded summary
//! ring kept in `storage.json`.
//!
//! Each run owns a single file that no other run ever touches, so writes
//! here don't need the cross-process merge dance that `storage.json` and
//! `adaptive-limits.json` require — a plain atomic write suffices.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::RunPayload;
use crate::paths;

#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            runs_dir: paths::runs_dir(state_dir),
        }
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    pub fn save(&self, payload: &RunPayload) -> Result<()> {
        let path = self.path_for(payload.run_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| StoreError::Write { path: path.clone(), source })?;
        }

        let json = serde_json::to_vec_pretty(payload)
            .map_err(|source| StoreError::Decode { path: path.clone(), source })?;

        let dir = path.parent().unwrap_or(&self.runs_dir);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|source| StoreError::Write { path: path.clone(), source })?;
        use std::io::Write;
        tmp.write_all(&json)
            .map_err(|source| StoreError::Write { path: path.clone(), source })?;
        tmp.persist(&path)
            .map_err(|e| StoreError::Write { path: path.clone(), source: e.error })?;
        Ok(())
    }

    pub fn load(&self, run_id: Uuid) -> Result<RunPayload> {
        let path = self.path_for(run_id);
        let bytes = std::fs::read(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::RunNotFound { run_id }
            } else {
                StoreError::Read { path: path.clone(), source }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode { path, source })
    }

    /// Append one event to an existing run payload and persist it.
    /// Intended for incremental writes as a harness streams events.
    pub fn append_event(&self, run_id: Uuid, event: crate::models::AgentEventRecord) -> Result<()> {
        let mut payload = self.load(run_id)?;
        payload.events.push(event);
        self.save(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentEventRecord, RunStatus};
    use chrono::Utc;

    fn sample_payload(run_id: Uuid) -> RunPayload {
        RunPayload {
            run_id,
            agent_id: Uuid::new_v4(),
            task_text: "write a test".into(),
            status: RunStatus::Completed,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            events: vec![],
            output: Some("done".into()),
            error: None,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = Uuid::new_v4();
        let payload = sample_payload(run_id);

        store.save(&payload).unwrap();
        let loaded = store.load(run_id).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn load_missing_run_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let err = store.load(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound { .. }));
    }

    #[test]
    fn append_event_persists_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = Uuid::new_v4();
        store.save(&sample_payload(run_id)).unwrap();

        store
            .append_event(
                run_id,
                AgentEventRecord {
                    at: Utc::now(),
                    kind: "stdout".into(),
                    text: Some("hello".into()),
                    fields: serde_json::Map::new(),
                },
            )
            .unwrap();

        let loaded = store.load(run_id).unwrap();
        assert_eq!(loaded.events.len(), 1);
        assert_eq!(loaded.events[0].kind, "stdout");
    }
}
