//! Runtime configuration (spec §6's configuration table, §4.3's adaptive
//! ranges). Loaded from TOML by `muster-cli::config` and handed to the
//! runtime as a plain value — no lazy-init singleton (spec §9: "express
//! as a process-wide service initialized once at startup, passed
//! explicitly to consumers").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_total_active_requests: u32,
    pub max_total_active_llm: u32,
    pub max_parallel_subagents_per_run: u32,
    pub max_parallel_teammates_per_team: u32,
    pub max_concurrent_orchestrations: u32,
    pub capacity_wait_ms: u64,
    pub capacity_poll_ms: u64,
    pub reservation_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,

    pub recovery_interval_ms: u64,
    pub reduction_factor: f64,
    pub recovery_factor: f64,
    pub predictive_enabled: bool,
    pub predictive_threshold: f64,
    pub global_multiplier: f64,

    pub max_retries: u32,
    pub max_rate_limit_retries: u32,
    pub max_rate_limit_wait_ms: u64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_mode: JitterMode,
    pub stable_profile: bool,

    pub idle_timeout_ms: u64,
    pub kill_grace_ms: u64,
    /// Cap on the one-shot empty-output recovery attempt (spec §4.5), so a
    /// harness that stalls just under `idle_timeout_ms` on every attempt
    /// can't spend roughly double the per-item budget before timing out.
    pub recovery_timeout_ms: u64,

    pub default_parallel_mode: ParallelMode,
    pub max_penalty: u32,
    pub penalty_decay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParallelMode {
    Current,
    All,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_total_active_requests: 64,
            max_total_active_llm: 16,
            max_parallel_subagents_per_run: 8,
            max_parallel_teammates_per_team: 8,
            max_concurrent_orchestrations: 4,
            capacity_wait_ms: 30_000,
            capacity_poll_ms: 100,
            reservation_ttl_ms: 15_000,
            heartbeat_interval_ms: 5_000,

            recovery_interval_ms: 60_000,
            reduction_factor: 0.5,
            recovery_factor: 1.2,
            predictive_enabled: true,
            predictive_threshold: 0.6,
            global_multiplier: 1.0,

            max_retries: 3,
            max_rate_limit_retries: 4,
            max_rate_limit_wait_ms: 60_000,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_mode: JitterMode::Partial,
            stable_profile: false,

            idle_timeout_ms: 300_000,
            kill_grace_ms: 500,
            recovery_timeout_ms: 60_000,

            default_parallel_mode: ParallelMode::Current,
            max_penalty: 5,
            penalty_decay_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse from a TOML document, then clamp to documented ranges
    /// (spec §3, §6) rather than rejecting out-of-range values outright.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut config: RuntimeConfig = toml::from_str(s)?;
        config.clamp_ranges();
        Ok(config)
    }

    pub fn clamp_ranges(&mut self) {
        self.reduction_factor = self.reduction_factor.clamp(0.3, 0.9);
        self.recovery_factor = self.recovery_factor.clamp(1.0, 1.5);
        self.predictive_threshold = self.predictive_threshold.clamp(0.0, 1.0);
        self.global_multiplier = self.global_multiplier.clamp(0.1, 2.0);
        self.recovery_interval_ms = self.recovery_interval_ms.max(60_000);
        self.max_parallel_subagents_per_run = self.max_parallel_subagents_per_run.max(1);
        self.max_concurrent_orchestrations = self.max_concurrent_orchestrations.max(1);
    }

    /// Retry parameters fixed by the stable profile (spec §4.5), applied
    /// when `stable_profile` is set instead of the caller-supplied values.
    pub fn with_stable_profile_applied(mut self) -> Self {
        if self.stable_profile {
            self.max_retries = 4;
            self.initial_delay_ms = 1_000;
            self.max_delay_ms = 30_000;
            self.backoff_multiplier = 2.0;
            self.jitter_mode = JitterMode::None;
            self.max_rate_limit_retries = 6;
            self.max_rate_limit_wait_ms = 90_000;
        }
        self
    }
}
