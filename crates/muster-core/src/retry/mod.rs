//! Retry-with-Backoff Engine (spec §4.5).
//!
//! Executes an arbitrary async operation with capped retries and
//! exponential backoff, honoring a per-(provider, model) rate-limit gate,
//! classifying errors, and surfacing a single diagnostic line per
//! exhausted call.

mod gate;

pub use gate::RateLimitGate;

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::{JitterMode, RuntimeConfig};
use crate::error::RetryError;

/// What a single attempt's failure means to the retry engine. Worker
/// closures return this instead of a bare error so classification
/// happens once, at the boundary, rather than via string matching deep
/// in the engine.
#[derive(Debug)]
pub enum AttemptError {
    Cancelled,
    Timeout,
    EmptyOutput,
    RateLimited { status: Option<u16> },
    Transient { status: Option<u16>, source: anyhow::Error },
    Nonretryable { source: anyhow::Error },
}

pub async fn run_with_retry<T, F, Fut>(
    key: &str,
    gate: &RateLimitGate,
    config: &RuntimeConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32, bool) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempts = 0u32;
    let mut retries = 0u32;
    let mut rate_limit_retries = 0u32;
    let mut recovery_used = false;
    let mut pending_recovery = false;
    let mut last_status: Option<u16> = None;
    let mut gate_wait_ms = 0u64;
    let mut gate_hits = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }

        if let Some(remaining) = gate.gated_remaining(key) {
            gate_hits += 1;
            let wait = remaining.min(Duration::from_millis(config.max_rate_limit_wait_ms));
            gate_wait_ms += wait.as_millis() as u64;
            tracing::debug!(key, wait_ms = wait.as_millis() as u64, "rate-limit gate hit, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts }),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        attempts += 1;
        let use_strict_prompt = pending_recovery;
        pending_recovery = false;

        match op(attempts, use_strict_prompt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Cancelled) => return Err(RetryError::Cancelled { attempts }),
            Err(AttemptError::Timeout) => return Err(RetryError::Timeout { attempts }),

            Err(AttemptError::EmptyOutput) => {
                if recovery_used {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last_status,
                        gate_wait_ms,
                        gate_hits,
                        source: anyhow::anyhow!("empty output after recovery attempt"),
                    });
                }
                recovery_used = true;
                pending_recovery = true;
                tracing::debug!(key, attempts, "empty output, scheduling one recovery attempt");
                continue;
            }

            Err(AttemptError::RateLimited { status }) => {
                last_status = status;
                rate_limit_retries += 1;
                gate.mark_gated(key, Duration::from_millis(config.max_rate_limit_wait_ms));
                if rate_limit_retries > config.max_rate_limit_retries {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last_status,
                        gate_wait_ms,
                        gate_hits,
                        source: anyhow::anyhow!("rate-limit retries exhausted"),
                    });
                }
                sleep_backoff(attempts, config, cancel).await;
            }

            Err(AttemptError::Transient { status, source }) => {
                last_status = status;
                retries += 1;
                if retries > config.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last_status,
                        gate_wait_ms,
                        gate_hits,
                        source,
                    });
                }
                sleep_backoff(attempts, config, cancel).await;
            }

            Err(AttemptError::Nonretryable { source }) => {
                return Err(RetryError::Nonretryable { source });
            }
        }

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }
    }
}

async fn sleep_backoff(attempt: u32, config: &RuntimeConfig, cancel: &CancellationToken) {
    let delay = backoff_delay(attempt, config);
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

/// `min(maxDelay, initialDelay * multiplier^(n-1))`, then jitter.
pub fn backoff_delay(attempt: u32, config: &RuntimeConfig) -> Duration {
    let exp = config.backoff_multiplier.powi((attempt.saturating_sub(1)) as i32);
    let base_ms = (config.initial_delay_ms as f64 * exp).min(config.max_delay_ms as f64);

    let jittered_ms = match config.jitter_mode {
        JitterMode::None => base_ms,
        JitterMode::Partial => base_ms * rand::rng().random_range(0.5..=1.0),
        JitterMode::Full => base_ms * rand::rng().random_range(0.0..=1.0),
    };

    Duration::from_millis(jittered_ms.max(0.0) as u64)
}
