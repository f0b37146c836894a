//! File-backed persistence for muster: `storage.json` (subagent
//! definitions + bounded run history), `runs/<runId>.json` (full per-run
//! payloads), and `adaptive-limits.json` (learned rate-controller state).
//!
//! Replaces a database with plain JSON files under the resolved state
//! directory (spec §6), coordinated across processes with advisory file
//! locks that fall back to best-effort local writes rather than ever
//! failing a run (spec §7, §9).

pub mod adaptive;
pub mod error;
pub mod lock;
pub mod models;
pub mod paths;
pub mod runs;
pub mod storage;

pub use adaptive::AdaptiveStore;
pub use error::{Result, StoreError};
pub use models::{
    AdaptiveControllerState, AgentEventRecord, LearnedLimit, RunPayload, RunStatus, Storage,
    SubagentDefinition, SubagentRunRecord, HISTORY_429_CAP, MAX_CONCURRENCY, RUN_RING_CAPACITY,
};
pub use runs::RunStore;
pub use storage::StorageStore;
