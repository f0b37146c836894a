//! Persisted data model: subagent definitions, run records, and the
//! adaptive rate controller's learned state.
//!
//! These are the structs written to `storage.json` and
//! `adaptive-limits.json` (spec §3, §6). Runtime-only types
//! (`CapacityReservation`, `RuntimeCapacitySnapshot`, `DagTaskResult`) are
//! not persisted and live in `muster-core` instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum concurrency any `LearnedLimit` may hold (spec §3 invariant).
pub const MAX_CONCURRENCY: u32 = 16;
/// Number of recent 429 timestamps retained per key (spec §3, §4.3).
pub const HISTORY_429_CAP: usize = 50;
/// Bounded ring size for run records (spec §3, §6).
pub const RUN_RING_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// SubagentDefinition
// ---------------------------------------------------------------------------

/// A named LLM persona executed as a child process for one delegated task.
///
/// Immutable except through explicit configure operations (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubagentDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Provider/model override; falls back to runtime defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub skill_tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl SubagentDefinition {
    /// The `"provider:model"` key used to look up learned rate limits,
    /// lowercased per spec §3.
    pub fn rate_key(&self, default_provider: &str, default_model: &str) -> String {
        let provider = self.provider.as_deref().unwrap_or(default_provider);
        let model = self.model.as_deref().unwrap_or(default_model);
        format!("{provider}:{model}").to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// SubagentRunRecord
// ---------------------------------------------------------------------------

/// Status of a completed subagent run. Immutable once created (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An immutable record of one subagent run, kept in a bounded ring of the
/// last `RUN_RING_CAPACITY` entries (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubagentRunRecord {
    pub run_id: Uuid,
    pub agent_id: Uuid,
    pub task_text: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

// ---------------------------------------------------------------------------
// LearnedLimit / AdaptiveControllerState
// ---------------------------------------------------------------------------

/// Per-(provider, model) learned concurrency and 429 history (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedLimit {
    pub concurrency: u32,
    pub original_concurrency: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_429_at: Option<DateTime<Utc>>,
    pub consecutive_429_count: u32,
    pub total_429_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    pub recovery_scheduled: bool,
    /// Bounded history of recent 429 timestamps, sorted ascending, capped
    /// at [`HISTORY_429_CAP`].
    #[serde(default)]
    pub history_429: Vec<DateTime<Utc>>,
}

impl LearnedLimit {
    /// A fresh limit for a key never seen before, baselined at
    /// `original_concurrency`.
    pub fn new(original_concurrency: u32) -> Self {
        let original_concurrency = original_concurrency.clamp(1, MAX_CONCURRENCY);
        Self {
            concurrency: original_concurrency,
            original_concurrency,
            last_429_at: None,
            consecutive_429_count: 0,
            total_429_count: 0,
            last_success_at: None,
            recovery_scheduled: false,
            history_429: Vec::new(),
        }
    }

    /// True if every documented invariant holds (spec §3, §8 — used in
    /// tests and as a defensive check after merges).
    pub fn invariants_hold(&self) -> bool {
        self.concurrency >= 1
            && self.concurrency <= self.original_concurrency
            && self.original_concurrency <= MAX_CONCURRENCY
            && self.history_429.len() <= HISTORY_429_CAP
            && self.history_429.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Process-wide adaptive controller state, persisted atomically under a
/// file lock (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveControllerState {
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    /// Keyed by lowercase `"provider:model"`.
    pub limits: std::collections::BTreeMap<String, LearnedLimit>,
    pub global_multiplier: f64,
    pub recovery_interval_ms: u64,
    pub reduction_factor: f64,
    pub recovery_factor: f64,
    pub predictive_enabled: bool,
    pub predictive_threshold: f64,
}

impl Default for AdaptiveControllerState {
    fn default() -> Self {
        Self {
            version: 0,
            last_updated: Utc::now(),
            limits: std::collections::BTreeMap::new(),
            global_multiplier: 1.0,
            recovery_interval_ms: 60_000,
            reduction_factor: 0.5,
            recovery_factor: 1.2,
            predictive_enabled: true,
            predictive_threshold: 0.6,
        }
    }
}

impl AdaptiveControllerState {
    /// Clamp all tunables to their documented ranges (spec §3), leaving
    /// per-key limits untouched (those are clamped independently).
    pub fn clamp_tunables(&mut self) {
        self.global_multiplier = self.global_multiplier.clamp(0.1, 2.0);
        self.recovery_interval_ms = self.recovery_interval_ms.max(60_000);
        self.reduction_factor = self.reduction_factor.clamp(0.3, 0.9);
        self.recovery_factor = self.recovery_factor.clamp(1.0, 1.5);
        self.predictive_threshold = self.predictive_threshold.clamp(0.0, 1.0);
    }
}

// ---------------------------------------------------------------------------
// Run payload (runs/<runId>.json)
// ---------------------------------------------------------------------------

/// One event emitted by a subagent's harness during a run, as persisted
/// to the run's payload file (spec §4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEventRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// The full, unbounded record of a single run: every event plus the final
/// output, kept separately from the bounded summary in `storage.json`
/// (spec §6 — `runs/<runId>.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunPayload {
    pub run_id: Uuid,
    pub agent_id: Uuid,
    pub task_text: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<AgentEventRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// storage.json envelope
// ---------------------------------------------------------------------------

/// Top-level shape of `storage.json` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Storage {
    #[serde(default)]
    pub agents: Vec<SubagentDefinition>,
    #[serde(default)]
    pub runs: Vec<SubagentRunRecord>,
    #[serde(default)]
    pub current_agent_id: Option<Uuid>,
    #[serde(default)]
    pub defaults_version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_learned_limit_satisfies_invariants() {
        let limit = LearnedLimit::new(8);
        assert!(limit.invariants_hold());
        assert_eq!(limit.concurrency, 8);
        assert_eq!(limit.original_concurrency, 8);
    }

    #[test]
    fn new_clamps_original_concurrency_to_max() {
        let limit = LearnedLimit::new(100);
        assert_eq!(limit.original_concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn default_adaptive_state_clamps_are_within_range() {
        let mut state = AdaptiveControllerState::default();
        state.global_multiplier = 5.0;
        state.reduction_factor = 0.01;
        state.recovery_factor = 9.0;
        state.clamp_tunables();
        assert!((0.1..=2.0).contains(&state.global_multiplier));
        assert!((0.3..=0.9).contains(&state.reduction_factor));
        assert!((1.0..=1.5).contains(&state.recovery_factor));
    }

    #[test]
    fn rate_key_falls_back_to_defaults_and_lowercases() {
        let agent = SubagentDefinition {
            id: Uuid::nil(),
            name: "n".into(),
            description: "d".into(),
            system_prompt: "p".into(),
            provider: None,
            model: Some("Claude-Opus".into()),
            skill_tags: vec![],
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(agent.rate_key("Anthropic", "default"), "anthropic:claude-opus");
    }
}
