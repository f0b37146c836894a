//! Dynamic Parallelism Adjuster (spec §4.4).
//!
//! Complements the Adaptive Rate Controller with per-endpoint **health**
//! tracking for the worker pool and orchestrators. In-memory only — the
//! ownership rules (§3) persist only `LearnedLimit`/
//! `AdaptiveControllerState`; this adjuster resets on process restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use muster_store::MAX_CONCURRENCY;

const ERROR_WINDOW_MINUTES: i64 = 5;
const ERROR_WINDOW_CAP: usize = 100;
const RESPONSE_TIME_CAP: usize = 50;

#[derive(Debug, Clone)]
struct KeyState {
    base: u32,
    current: u32,
    min: u32,
    max: u32,
    error_window: VecDeque<DateTime<Utc>>,
    response_times: VecDeque<u64>,
    cross_instance_multiplier: f64,
    last_429_at: Option<DateTime<Utc>>,
    recent_429_count: u32,
    last_adjustment_at: DateTime<Utc>,
}

impl KeyState {
    fn new(base: u32, min: u32, max: u32) -> Self {
        let now = Utc::now();
        Self {
            base,
            current: base,
            min,
            max,
            error_window: VecDeque::new(),
            response_times: VecDeque::new(),
            cross_instance_multiplier: 1.0,
            last_429_at: None,
            recent_429_count: 0,
            last_adjustment_at: now,
        }
    }

    fn prune_error_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(ERROR_WINDOW_MINUTES);
        while self.error_window.front().is_some_and(|t| *t < cutoff) {
            self.error_window.pop_front();
        }
        while self.error_window.len() > ERROR_WINDOW_CAP {
            self.error_window.pop_front();
        }
    }

    fn push_error(&mut self, now: DateTime<Utc>) {
        self.error_window.push_back(now);
        self.prune_error_window(now);
        self.last_adjustment_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub recommended_backoff_ms: u64,
}

pub struct ParallelismAdjuster {
    states: Arc<Mutex<HashMap<String, KeyState>>>,
    base_parallelism: u32,
    recovery_interval_ms: u64,
}

impl ParallelismAdjuster {
    pub fn new(base_parallelism: u32, recovery_interval_ms: u64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            base_parallelism: base_parallelism.clamp(1, MAX_CONCURRENCY),
            recovery_interval_ms,
        }
    }

    async fn with_state<T>(&self, key: &str, f: impl FnOnce(&mut KeyState) -> T) -> T {
        let mut states = self.states.lock().await;
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(self.base_parallelism, 1, MAX_CONCURRENCY));
        f(state)
    }

    pub async fn current(&self, key: &str) -> u32 {
        self.with_state(key, |s| s.current).await
    }

    pub async fn record_429(&self, key: &str) {
        let now = Utc::now();
        let current = self
            .with_state(key, |s| {
                s.current = (((s.current as f64) * (1.0 - 0.3)).floor() as u32).max(s.min);
                s.last_429_at = Some(now);
                s.recent_429_count += 1;
                s.push_error(now);
                s.current
            })
            .await;
        tracing::debug!(key, current, "parallelism reduced after 429");
    }

    pub async fn record_timeout(&self, key: &str) {
        let now = Utc::now();
        self.with_state(key, |s| {
            s.current = (((s.current as f64) * (1.0 - 0.1)).floor() as u32).max(s.min);
            s.push_error(now);
        })
        .await;
    }

    pub async fn record_error(&self, key: &str) {
        let now = Utc::now();
        self.with_state(key, |s| {
            s.current = (((s.current as f64) * (1.0 - 0.05)).floor() as u32).max(s.min);
            s.push_error(now);
        })
        .await;
    }

    pub async fn record_response_time(&self, key: &str, millis: u64) {
        self.with_state(key, |s| {
            s.response_times.push_back(millis);
            if s.response_times.len() > RESPONSE_TIME_CAP {
                s.response_times.pop_front();
            }
        })
        .await;
    }

    /// `current := min(base, ceil(current * 1.1))` for any key with no
    /// errors in its rolling window and enough elapsed time since the
    /// last adjustment.
    pub async fn run_recovery_tick(&self) -> Vec<(String, u32)> {
        let now = Utc::now();
        let mut states = self.states.lock().await;
        let mut changed = Vec::new();

        for (key, state) in states.iter_mut() {
            state.prune_error_window(now);
            let since_last = (now - state.last_adjustment_at).num_milliseconds().max(0) as u64;
            if state.error_window.is_empty() && since_last >= self.recovery_interval_ms {
                let next = (((state.current as f64) * 1.1).ceil() as u32).min(state.base);
                if next != state.current {
                    state.current = next;
                    state.last_adjustment_at = now;
                    changed.push((key.clone(), next));
                }
            }
        }
        if !changed.is_empty() {
            tracing::debug!(?changed, "parallelism recovery tick adjusted keys");
        }
        changed
    }

    /// `applyCrossInstanceLimits`: multiplier := 1 / instanceCount.
    pub async fn apply_cross_instance_limits(&self, key: &str, instance_count: u32) {
        let multiplier = 1.0 / (instance_count.max(1) as f64);
        self.with_state(key, |s| s.cross_instance_multiplier = multiplier).await;
    }

    /// `floor(current * crossInstanceMultiplier)`.
    pub async fn effective_parallelism(&self, key: &str) -> u32 {
        self.with_state(key, |s| ((s.current as f64) * s.cross_instance_multiplier).floor() as u32)
            .await
            .max(1)
    }

    pub async fn health(&self, key: &str) -> HealthStatus {
        let now = Utc::now();
        self.with_state(key, |s| {
            s.prune_error_window(now);
            let no_recent_errors = s.error_window.is_empty();
            let healthy = no_recent_errors && (s.current as f64) >= 0.8 * (s.base as f64);

            let since_last_429 = s
                .last_429_at
                .map(|t| (now - t).num_milliseconds().max(0) as u64)
                .unwrap_or(u64::MAX);
            let backoff_cap_ms = 60_000u64;
            let raw = 1_000u64.saturating_mul(1u64 << s.recent_429_count.min(20));
            let recommended_backoff_ms = raw.min(backoff_cap_ms).saturating_sub(since_last_429);

            HealthStatus { healthy, recommended_backoff_ms }
        })
        .await
    }
}
