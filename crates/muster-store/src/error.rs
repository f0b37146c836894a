//! Error taxonomy for the persistence layer.
//!
//! Structured, matchable variants at this layer (callers in `muster-core`
//! decide whether a read/write failure should abort a run or degrade
//! gracefully); composition sites elsewhere use `anyhow`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("run {run_id} not found")]
    RunNotFound { run_id: uuid::Uuid },

    #[error("agent {agent_id} not found")]
    AgentNotFound { agent_id: uuid::Uuid },
}

pub type Result<T> = std::result::Result<T, StoreError>;
