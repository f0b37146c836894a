//! Adaptive Rate Controller (spec §4.3).
//!
//! Learns per-(provider, model) safe concurrency from observed outcomes,
//! reduces on 429/rate-limit, recovers over time, predicts risk windows,
//! and exposes a single scheduler-aware effective limit. State is
//! persisted through `muster_store::AdaptiveStore`, which already
//! handles the cross-process file lock and merge-on-write; this module
//! adds in-process per-key serialization (spec §5: "rate controller
//! mutations are serialized per key under the state lock") and the
//! actual learning algorithm.

mod predictive;

pub use predictive::PredictiveAnalysis;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use muster_store::{AdaptiveStore, LearnedLimit, MAX_CONCURRENCY};

use crate::config::RuntimeConfig;

fn clamp_concurrency(x: f64) -> u32 {
    (x.round() as i64).clamp(1, MAX_CONCURRENCY as i64) as u32
}

/// Outcomes the retry engine / orchestrator report against a learned key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateEvent {
    Success,
    RateLimited,
    Timeout,
    Error,
}

pub struct AdaptiveRateController {
    store: AdaptiveStore,
    config: RuntimeConfig,
    /// Serializes mutations against the whole map: one in-process
    /// singleton, so a single mutex (not per-key sharding) is correct
    /// and keeps read-modify-write of a key's `LearnedLimit` atomic.
    lock: Mutex<()>,
}

impl AdaptiveRateController {
    pub fn new(store: AdaptiveStore, config: RuntimeConfig) -> Self {
        Self { store, config, lock: Mutex::new(()) }
    }

    fn baseline_concurrency(&self) -> u32 {
        self.config.max_parallel_subagents_per_run.clamp(1, MAX_CONCURRENCY)
    }

    pub async fn learned_limit(&self, key: &str) -> anyhow::Result<LearnedLimit> {
        let _guard = self.lock.lock().await;
        Ok(self.store.get_or_init(key, self.baseline_concurrency())?)
    }

    pub async fn record(&self, key: &str, event: RateEvent) -> anyhow::Result<LearnedLimit> {
        let _guard = self.lock.lock().await;
        let mut limit = self.store.get_or_init(key, self.baseline_concurrency())?;
        let now = Utc::now();

        match event {
            RateEvent::Success => apply_success(&mut limit, now),
            RateEvent::RateLimited => apply_429(&mut limit, now, self.config.reduction_factor),
            RateEvent::Timeout => apply_timeout(&mut limit),
            RateEvent::Error => {}
        }

        self.store.put(key, limit.clone())?;
        tracing::debug!(key, ?event, concurrency = limit.concurrency, "rate controller event applied");
        Ok(limit)
    }

    /// Periodic recovery tick (spec §4.3, run every ~60s by a scheduled
    /// task per spec §9 — no leaked background workers, caller owns the
    /// timer).
    pub async fn run_recovery_tick(&self) -> anyhow::Result<Vec<(String, LearnedLimit)>> {
        let _guard = self.lock.lock().await;
        let mut state = self.store.load()?;
        let now = Utc::now();
        let mut changed = Vec::new();

        for (key, limit) in state.limits.iter_mut() {
            if !limit.recovery_scheduled {
                continue;
            }
            let Some(last_429) = limit.last_429_at else { continue };
            let Some(last_success) = limit.last_success_at else { continue };

            let since_429 = (now - last_429).num_milliseconds().max(0) as u64;
            let since_success = (now - last_success).num_milliseconds().max(0) as u64;

            if since_429 >= self.config.recovery_interval_ms && since_success <= self.config.recovery_interval_ms {
                let next = clamp_concurrency((limit.concurrency as f64 * self.config.recovery_factor).ceil());
                limit.concurrency = next.min(limit.original_concurrency);
                if limit.concurrency >= limit.original_concurrency {
                    limit.recovery_scheduled = false;
                    limit.consecutive_429_count = 0;
                }
                changed.push((key.clone(), limit.clone()));
            }
        }

        for (key, limit) in &changed {
            self.store.put(key, limit.clone())?;
        }
        Ok(changed)
    }

    pub async fn predict(&self, key: &str) -> anyhow::Result<PredictiveAnalysis> {
        let limit = self.learned_limit(key).await?;
        Ok(predictive::analyze(&limit, self.config.predictive_threshold, Utc::now()))
    }

    /// `clamp(floor(learned.concurrency * globalMultiplier))` reduced by
    /// the predictive limit if throttling is recommended and enabled.
    pub async fn effective_limit(&self, key: &str) -> anyhow::Result<u32> {
        let limit = self.learned_limit(key).await?;
        let base = clamp_concurrency((limit.concurrency as f64 * self.config.global_multiplier).floor());

        if !self.config.predictive_enabled {
            return Ok(base);
        }
        let analysis = predictive::analyze(&limit, self.config.predictive_threshold, Utc::now());
        match analysis.recommended_concurrency {
            Some(recommended) if analysis.probability > self.config.predictive_threshold => {
                Ok(base.min(recommended))
            }
            _ => Ok(base),
        }
    }
}

fn apply_success(limit: &mut LearnedLimit, now: DateTime<Utc>) {
    limit.last_success_at = Some(now);
    limit.consecutive_429_count = 0;
    if limit.concurrency < limit.original_concurrency {
        limit.recovery_scheduled = true;
    }
}

fn apply_429(limit: &mut LearnedLimit, now: DateTime<Utc>, reduction_factor: f64) {
    limit.history_429.push(now);
    if limit.history_429.len() > muster_store::HISTORY_429_CAP {
        let overflow = limit.history_429.len() - muster_store::HISTORY_429_CAP;
        limit.history_429.drain(0..overflow);
    }

    // Thresholds check the *pre-increment* consecutive count, per spec
    // §4.3's event table; the increment itself happens last.
    let mut next = clamp_concurrency((limit.concurrency as f64 * reduction_factor).floor());
    if limit.consecutive_429_count >= 3 {
        next = clamp_concurrency((next as f64 * 0.5).floor());
    }
    if limit.consecutive_429_count >= 5 {
        next = 1;
    }
    limit.concurrency = next;

    limit.last_429_at = Some(now);
    limit.consecutive_429_count += 1;
    limit.total_429_count += 1;
    limit.recovery_scheduled = false;
}

fn apply_timeout(limit: &mut LearnedLimit) {
    if limit.consecutive_429_count > 0 {
        limit.concurrency = clamp_concurrency(limit.concurrency as f64 * 0.9);
    }
}
