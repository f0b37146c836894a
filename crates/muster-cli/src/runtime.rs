//! Assembles the runtime stack (admission controller, rate controller,
//! parallelism adjuster, harness registry, storage) into a
//! [`RunOrchestrator`] from a resolved [`crate::config::ConfigFile`],
//! wiring up in-process singletons rather than a connection pool.

use std::sync::Arc;
use std::time::Duration;

use muster_core::admission::AdmissionController;
use muster_core::harness::{CommandTemplate, HarnessRegistry, ProcessHarness};
use muster_core::parallelism::ParallelismAdjuster;
use muster_core::rate::AdaptiveRateController;
use muster_core::RunOrchestrator;
use muster_store::{AdaptiveStore, RunStore, StorageStore};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigFile;

/// Build the orchestrator plus the storage handle callers need directly
/// (for `subagent list/create/configure` and `runs`, which bypass the
/// orchestrator).
pub struct RuntimeStack {
    pub orchestrator: RunOrchestrator,
    pub storage: Arc<StorageStore>,
    pub runs: Arc<RunStore>,
    pub admission: Arc<AdmissionController>,
    pub rate_controller: Arc<AdaptiveRateController>,
    pub parallelism: Arc<ParallelismAdjuster>,
}

pub fn build(config: ConfigFile, state_dir: &std::path::Path) -> RuntimeStack {
    let runtime_config = config.runtime.with_stable_profile_applied();

    let admission = Arc::new(AdmissionController::new(runtime_config.clone()));
    let adaptive_store = AdaptiveStore::new(state_dir);
    let rate_controller = Arc::new(AdaptiveRateController::new(adaptive_store, runtime_config.clone()));
    let parallelism = Arc::new(ParallelismAdjuster::new(runtime_config.max_parallel_subagents_per_run, runtime_config.recovery_interval_ms));

    let mut registry = HarnessRegistry::new();
    registry.register(ProcessHarness::with_kill_grace(
        config.harness.provider.clone(),
        CommandTemplate {
            program: config.harness.program.clone(),
            base_args: config.harness.base_args.clone(),
            prompt_flag: config.harness.prompt_flag.clone(),
        },
        Duration::from_millis(runtime_config.kill_grace_ms),
    ));
    let harnesses = Arc::new(registry);

    let storage = Arc::new(StorageStore::new(state_dir));
    let runs = Arc::new(RunStore::new(state_dir));

    let orchestrator = RunOrchestrator::new(
        admission.clone(),
        rate_controller.clone(),
        parallelism.clone(),
        harnesses,
        storage.clone(),
        runs.clone(),
        runtime_config,
    );

    RuntimeStack { orchestrator, storage, runs, admission, rate_controller, parallelism }
}

/// Background timers (spec §9): recovery tick for the rate controller and
/// parallelism adjuster, plus the admission controller's expired-reservation
/// sweep, all on one bounded interval, stopped when `cancel` fires. Mirrors
/// the per-run heartbeat loop in `RunOrchestrator::run_selected`.
pub fn spawn_recovery_loop(stack: &RuntimeStack, interval_ms: u64, cancel: CancellationToken) {
    let admission = stack.admission.clone();
    let rate_controller = stack.rate_controller.clone();
    let parallelism = stack.parallelism.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    admission.sweep_expired().await;
                    if let Err(e) = rate_controller.run_recovery_tick().await {
                        tracing::warn!(error = %e, "rate controller recovery tick failed");
                    }
                    parallelism.run_recovery_tick().await;
                }
            }
        }
    });
}
