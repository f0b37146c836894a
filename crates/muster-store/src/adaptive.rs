//! `adaptive-limits.json`: the rate controller's learned per-key
//! concurrency state.
//!
//! This module only persists state; the actual reduction/recovery
//! algorithm (spec §4.3, the Adaptive Rate Controller) lives in
//! `muster-core` and calls through these primitives under its own lock
//! for the duration of a read-modify-write cycle.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::lock::FileLock;
use crate::models::{AdaptiveControllerState, LearnedLimit};
use crate::paths;

#[derive(Debug, Clone)]
pub struct AdaptiveStore {
    path: PathBuf,
}

impl AdaptiveStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: paths::adaptive_limits_path(state_dir),
        }
    }

    pub fn load(&self) -> Result<AdaptiveControllerState> {
        read_state(&self.path)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut AdaptiveControllerState) -> T) -> Result<T> {
        let _lock = FileLock::try_acquire_default(&self.path)
            .map_err(|source| StoreError::Write { path: self.path.clone(), source })?;

        let mut state = read_state(&self.path)?;
        let result = f(&mut state);
        state.last_updated = Utc::now();
        state.version += 1;
        state.clamp_tunables();
        write_state_atomic(&self.path, &state)?;
        Ok(result)
    }

    /// Fetch the learned limit for `key`, creating one baselined at
    /// `baseline_concurrency` if this key has never been seen.
    pub fn get_or_init(&self, key: &str, baseline_concurrency: u32) -> Result<LearnedLimit> {
        self.mutate(|state| {
            state
                .limits
                .entry(key.to_string())
                .or_insert_with(|| LearnedLimit::new(baseline_concurrency))
                .clone()
        })
    }

    /// Replace the learned limit for `key` wholesale. Callers compute the
    /// next state (reduction/recovery) and persist it here.
    pub fn put(&self, key: &str, limit: LearnedLimit) -> Result<()> {
        self.mutate(|state| {
            state.limits.insert(key.to_string(), limit);
        })
    }

    pub fn update_tunables(&self, f: impl FnOnce(&mut AdaptiveControllerState)) -> Result<()> {
        self.mutate(f)
    }
}

fn read_state(path: &Path) -> Result<AdaptiveControllerState> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|source| StoreError::Decode { path: path.to_path_buf(), source }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AdaptiveControllerState::default()),
        Err(source) => Err(StoreError::Read { path: path.to_path_buf(), source }),
    }
}

fn write_state_atomic(path: &Path, state: &AdaptiveControllerState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
    }

    let json = serde_json::to_vec_pretty(state)
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
