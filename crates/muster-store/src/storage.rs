//! `storage.json`: subagent definitions and the bounded run history ring.
//!
//! Every mutation follows the same pattern: acquire the sidecar file lock
//! (best-effort — see [`crate::lock`]), re-read the file from disk so a
//! concurrent writer's changes aren't clobbered, apply the mutation, then
//! write back atomically via a temp file + rename.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::lock::FileLock;
use crate::models::{Storage, SubagentDefinition, SubagentRunRecord, RUN_RING_CAPACITY};
use crate::paths;

/// Handle onto `storage.json` under a given state directory.
#[derive(Debug, Clone)]
pub struct StorageStore {
    path: PathBuf,
}

impl StorageStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: paths::storage_path(state_dir),
        }
    }

    /// Read the current storage file, returning an empty [`Storage`] if it
    /// doesn't exist yet (first run).
    pub fn load(&self) -> Result<Storage> {
        read_storage(&self.path)
    }

    /// Apply `mutate` to the current storage under the file lock and
    /// persist the result, returning whatever `mutate` returns.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut Storage) -> T) -> Result<T> {
        let _lock = FileLock::try_acquire_default(&self.path)
            .map_err(|source| StoreError::Write { path: self.path.clone(), source })?;

        let mut storage = read_storage(&self.path)?;
        let result = mutate(&mut storage);
        write_storage_atomic(&self.path, &storage)?;
        Ok(result)
    }

    pub fn list_agents(&self) -> Result<Vec<SubagentDefinition>> {
        Ok(self.load()?.agents)
    }

    pub fn get_agent(&self, id: Uuid) -> Result<SubagentDefinition> {
        self.load()?
            .agents
            .into_iter()
            .find(|a| a.id == id)
            .ok_or(StoreError::AgentNotFound { agent_id: id })
    }

    /// Insert a new agent or replace an existing one with the same id.
    pub fn upsert_agent(&self, agent: SubagentDefinition) -> Result<()> {
        self.mutate(|storage| {
            if let Some(existing) = storage.agents.iter_mut().find(|a| a.id == agent.id) {
                *existing = agent;
            } else {
                storage.agents.push(agent);
            }
        })
    }

    pub fn set_current_agent(&self, id: Uuid) -> Result<()> {
        self.mutate(|storage| {
            storage.current_agent_id = Some(id);
        })
    }

    pub fn current_agent(&self) -> Result<Option<SubagentDefinition>> {
        let storage = self.load()?;
        Ok(storage
            .current_agent_id
            .and_then(|id| storage.agents.into_iter().find(|a| a.id == id)))
    }

    /// Append a run record, trimming the ring to [`RUN_RING_CAPACITY`] by
    /// dropping the oldest entries (by `started_at`).
    pub fn record_run(&self, record: SubagentRunRecord) -> Result<()> {
        self.mutate(|storage| {
            storage.runs.push(record);
            if storage.runs.len() > RUN_RING_CAPACITY {
                storage.runs.sort_by_key(|r| r.started_at);
                let overflow = storage.runs.len() - RUN_RING_CAPACITY;
                storage.runs.drain(0..overflow);
            }
        })
    }

    pub fn list_runs(&self) -> Result<Vec<SubagentRunRecord>> {
        Ok(self.load()?.runs)
    }
}

fn read_storage(path: &Path) -> Result<Storage> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|source| StoreError::Decode { path: path.to_path_buf(), source }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Storage::default()),
        Err(source) => Err(StoreError::Read { path: path.to_path_buf(), source }),
    }
}

/// Write `storage` to `path` atomically: serialize to a sibling temp file,
/// then rename over the target (rename is atomic within a filesystem).
fn write_storage_atomic(path: &Path, storage: &Storage) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
    }

    let json = serde_json::to_vec_pretty(storage)
        .map_err(|source| StoreError::Decode { path: path.to_path_buf(), source })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
    use std::io::Write;
    tmp.write_all(&json)
        .map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
    tmp.persist(path)
        .map_err(|e| StoreError::Write { path: path.to_path_buf(), source: e.error })?;
    Ok(())
}
