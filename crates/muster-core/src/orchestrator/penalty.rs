//! Adaptive penalty (spec §4.7 "Parallelism computation", §9 glossary).
//!
//! An integer divisor `p in [0, maxPenalty]` applied to a parallelism
//! baseline: `effective := max(1, baseline / (p + 1))`. Raised by one
//! step on a pressure failure (`rate_limit` or `capacity`), lowered by
//! one step on a clean run, and decays by one step every `decayMs` of
//! elapsed wall-clock time regardless of traffic. Mirrors the
//! time-gated decay shape of [`crate::parallelism::ParallelismAdjuster`]
//! but tracks a single scalar rather than a per-key health map, since
//! the penalty is process-wide (spec §4.7 scopes it to the orchestrator,
//! not per provider/model).

use std::sync::Mutex;

use tokio::time::Instant;

pub struct AdaptivePenalty {
    max_penalty: u32,
    decay: std::time::Duration,
    state: Mutex<State>,
}

struct State {
    value: u32,
    last_decay_at: Instant,
}

impl AdaptivePenalty {
    pub fn new(max_penalty: u32, decay_ms: u64) -> Self {
        Self {
            max_penalty,
            decay: std::time::Duration::from_millis(decay_ms.max(1)),
            state: Mutex::new(State { value: 0, last_decay_at: Instant::now() }),
        }
    }

    /// Current penalty value, after applying any decay steps owed since
    /// the last observation.
    pub fn current(&self) -> u32 {
        self.decay_tick()
    }

    /// Raise the penalty by one step on a pressure failure, clamped at
    /// `max_penalty`.
    pub fn raise(&self) -> u32 {
        self.decay_tick();
        let mut state = self.state.lock().unwrap();
        state.value = (state.value + 1).min(self.max_penalty);
        state.value
    }

    /// Lower the penalty by one step on a clean run, floored at zero.
    pub fn lower(&self) -> u32 {
        self.decay_tick();
        let mut state = self.state.lock().unwrap();
        state.value = state.value.saturating_sub(1);
        state.value
    }

    /// Advance time-based decay: one step for every whole `decay`
    /// interval elapsed since the last tick. Called implicitly by
    /// [`Self::current`], [`Self::raise`], and [`Self::lower`], so
    /// callers never need to drive it directly.
    fn decay_tick(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        let elapsed = state.last_decay_at.elapsed();
        let steps = (elapsed.as_millis() / self.decay.as_millis().max(1)) as u32;
        if steps > 0 {
            state.value = state.value.saturating_sub(steps);
            state.last_decay_at += self.decay * steps;
        }
        state.value
    }

    /// `max(1, baseline / (p + 1))` at the current penalty value.
    pub fn apply(&self, baseline: u32) -> u32 {
        let p = self.current();
        (baseline / (p + 1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_penalty_applies_baseline_unchanged() {
        let penalty = AdaptivePenalty::new(5, 30_000);
        assert_eq!(penalty.current(), 0);
        assert_eq!(penalty.apply(8), 8);
    }

    #[test]
    fn raise_halves_then_thirds_the_baseline() {
        let penalty = AdaptivePenalty::new(5, 30_000);
        penalty.raise();
        assert_eq!(penalty.apply(8), 4);
        penalty.raise();
        assert_eq!(penalty.apply(8), 2);
    }

    #[test]
    fn raise_clamps_at_max_penalty() {
        let penalty = AdaptivePenalty::new(1, 30_000);
        penalty.raise();
        penalty.raise();
        penalty.raise();
        assert_eq!(penalty.current(), 1);
    }

    #[test]
    fn lower_floors_at_zero() {
        let penalty = AdaptivePenalty::new(5, 30_000);
        penalty.lower();
        penalty.lower();
        assert_eq!(penalty.current(), 0);
    }

    #[test]
    fn apply_never_returns_zero_even_at_max_penalty() {
        let penalty = AdaptivePenalty::new(5, 30_000);
        for _ in 0..5 {
            penalty.raise();
        }
        assert_eq!(penalty.current(), 5);
        assert_eq!(penalty.apply(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn decays_by_one_step_per_elapsed_interval() {
        let penalty = AdaptivePenalty::new(5, 1_000);
        penalty.raise();
        penalty.raise();
        penalty.raise();
        assert_eq!(penalty.current(), 3);

        tokio::time::advance(std::time::Duration::from_millis(2_500)).await;
        assert_eq!(penalty.current(), 1);
    }
}
