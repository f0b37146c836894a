//! Property tests for the retry backoff curve and the admission
//! controller's capacity bookkeeping.
//!
//! Invariants tested:
//! - Backoff delay never exceeds `max_delay_ms` and is monotonic without jitter
//! - The admission controller never admits past its configured totals,
//!   under an arbitrary interleaving of reserve/release calls

use std::time::Duration;

use muster_core::config::{JitterMode, RuntimeConfig};
use muster_core::retry::backoff_delay;
use muster_core::AdmissionController;
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn backoff_config(initial_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> RuntimeConfig {
    RuntimeConfig {
        initial_delay_ms,
        max_delay_ms: max_delay_ms.max(initial_delay_ms),
        backoff_multiplier,
        jitter_mode: JitterMode::None,
        ..RuntimeConfig::default()
    }
}

fn capacity_config(max_total_active_requests: u32, max_total_active_llm: u32) -> RuntimeConfig {
    RuntimeConfig {
        max_total_active_requests,
        max_total_active_llm,
        max_parallel_subagents_per_run: max_total_active_requests,
        max_parallel_teammates_per_team: max_total_active_llm,
        ..RuntimeConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: backoff delay is bounded by `max_delay_ms` and never
    /// decreases as the attempt counter climbs, for any in-range config.
    #[test]
    fn backoff_delay_is_bounded_and_monotonic(
        initial_delay_ms in 1u64..=2_000,
        max_delay_ms in 1u64..=60_000,
        backoff_multiplier in 1.0f64..=4.0,
        attempt in 1u32..=12,
    ) {
        let config = backoff_config(initial_delay_ms, max_delay_ms, backoff_multiplier);

        let this = backoff_delay(attempt, &config);
        let next = backoff_delay(attempt + 1, &config);

        prop_assert!(this <= Duration::from_millis(config.max_delay_ms));
        prop_assert!(next <= Duration::from_millis(config.max_delay_ms));
        prop_assert!(next >= this, "backoff should never shrink between successive attempts without jitter");
    }

    /// Property: no sequence of reserve/release calls against a fixed-size
    /// admission controller ever drives its live totals past the
    /// configured maximum, regardless of how the individual charges are
    /// sized or ordered.
    #[test]
    fn admission_totals_never_exceed_configured_maximum(
        max_total in 1u32..=16,
        charges in prop::collection::vec(1u32..=4, 1..20),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let admission = AdmissionController::new(capacity_config(max_total, max_total));
            let mut held = Vec::new();

            for charge in charges {
                match admission.try_reserve(charge, charge).await {
                    Ok(reservation) => held.push(reservation),
                    Err(_denied) => {
                        // Release one held reservation to make room, mimicking
                        // work finishing under sustained admission pressure.
                        if let Some(reservation) = held.pop() {
                            reservation.release().await;
                        }
                    }
                }

                let snapshot = admission.snapshot().await;
                prop_assert!(snapshot.active_requests <= max_total);
                prop_assert!(snapshot.active_llm <= max_total);
            }

            for reservation in held {
                reservation.release().await;
            }

            let snapshot = admission.snapshot().await;
            prop_assert_eq!(snapshot.active_requests, 0);
            prop_assert_eq!(snapshot.active_llm, 0);

            Ok(())
        })?;
    }
}
