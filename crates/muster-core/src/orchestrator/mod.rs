//! Run Orchestrator (spec §4.7): the end-to-end contract behind
//! `run-single`, `run-parallel`, and `run-dag`. Composes admission,
//! spawn loop, retry/escalate, and cancellation drain around an
//! arbitrary set of selected subagents or a dependency graph.

pub mod live_view;
pub mod penalty;
pub mod selection;
pub mod task_exec;

pub use live_view::{LiveViewEvent, LiveViewSink, NullSink};
pub use penalty::AdaptivePenalty;
pub use selection::select_agents;
pub use task_exec::{execute_task, TaskExecInput, TaskExecOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use muster_store::{AgentEventRecord, RunPayload, RunStatus, RunStore, StorageStore, SubagentDefinition, SubagentRunRecord};

use crate::admission::{AdmissionController, Priority as QueuePriority};
use crate::config::RuntimeConfig;
use crate::dag::{self, DagExecutorOptions, DagOutcomeStatus, DagTaskResult, TaskPlan};
use crate::error::{AdmissionError, OutcomeCode, SelectionError};
use crate::harness::HarnessRegistry;
use crate::parallelism::ParallelismAdjuster;
use crate::rate::{AdaptiveRateController, RateEvent};
use crate::retry::RateLimitGate;

/// One selected agent's outcome within a `run-single`/`run-parallel`
/// call, or one DAG node's outcome within `run-dag`.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: chrono::DateTime<Utc>,
    pub status: OutcomeCode,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Aggregate result of one orchestrator entry point (spec §4.7 step 7).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub outcome_code: OutcomeCode,
    pub retry_recommended: bool,
    pub items: Vec<ItemOutcome>,
}

/// Aggregate per-task statuses into `(outcomeCode, retryRecommended)`
/// (spec §4.7 step 7).
fn aggregate(items: &[ItemOutcome]) -> (OutcomeCode, bool) {
    if items.is_empty() {
        return (OutcomeCode::NonretryableFailure, false);
    }
    let succeeded = items.iter().filter(|i| i.status == OutcomeCode::Success).count();
    let any_retryable = items.iter().any(|i| i.status != OutcomeCode::Success && i.status.retry_recommended());

    if succeeded == items.len() {
        (OutcomeCode::Success, false)
    } else if succeeded == 0 {
        if any_retryable {
            (OutcomeCode::RetryableFailure, true)
        } else {
            (OutcomeCode::NonretryableFailure, false)
        }
    } else {
        (OutcomeCode::PartialSuccess, any_retryable)
    }
}

pub struct RunOrchestrator {
    admission: Arc<AdmissionController>,
    rate_controller: Arc<AdaptiveRateController>,
    parallelism: Arc<ParallelismAdjuster>,
    harnesses: Arc<HarnessRegistry>,
    storage: Arc<StorageStore>,
    runs: Arc<RunStore>,
    gate: Arc<RateLimitGate>,
    penalty: Arc<AdaptivePenalty>,
    config: RuntimeConfig,
}

impl RunOrchestrator {
    pub fn new(
        admission: Arc<AdmissionController>,
        rate_controller: Arc<AdaptiveRateController>,
        parallelism: Arc<ParallelismAdjuster>,
        harnesses: Arc<HarnessRegistry>,
        storage: Arc<StorageStore>,
        runs: Arc<RunStore>,
        config: RuntimeConfig,
    ) -> Self {
        let penalty = Arc::new(AdaptivePenalty::new(config.max_penalty, config.penalty_decay_ms));
        Self { admission, rate_controller, parallelism, harnesses, storage, runs, gate: Arc::new(RateLimitGate::new()), penalty, config }
    }

    fn rate_key(&self, agent: &SubagentDefinition) -> String {
        agent.rate_key(&self.config_default_provider(), &self.config_default_model())
    }

    // Defaults used when an agent leaves provider/model unset. Kept as
    // methods (rather than constants) so a future config field can
    // override them without changing call sites.
    fn config_default_provider(&self) -> String {
        "anthropic".to_string()
    }

    fn config_default_model(&self) -> String {
        "claude".to_string()
    }

    /// `run-single` (spec §4.7): execute exactly one named subagent.
    pub async fn run_single(
        &self,
        agent_id: Uuid,
        task_text: &str,
        sink: Arc<dyn LiveViewSink>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AdmissionError> {
        let agents = self.storage.list_agents().map_err(|_| AdmissionError::Denied { reasons: vec![] })?;
        let selected = select_agents(&agents, Some(&[agent_id])).map_err(Self::selection_to_admission)?;
        self.run_selected(selected, task_text, sink, cancel, false).await
    }

    /// `run-parallel` (spec §4.7): execute every selected subagent (or
    /// every enabled one, by default) concurrently.
    pub async fn run_parallel(
        &self,
        agent_ids: Option<&[Uuid]>,
        task_text: &str,
        sink: Arc<dyn LiveViewSink>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AdmissionError> {
        let agents = self.storage.list_agents().map_err(|_| AdmissionError::Denied { reasons: vec![] })?;
        let selected = select_agents(&agents, agent_ids).map_err(Self::selection_to_admission)?;
        self.run_selected(selected, task_text, sink, cancel, true).await
    }

    fn selection_to_admission(_err: SelectionError) -> AdmissionError {
        AdmissionError::Denied { reasons: vec![] }
    }

    /// Shared body of `run_single`/`run_parallel`: admission, heartbeat,
    /// bounded-concurrency dispatch (via [`crate::pool::run_pool`]),
    /// adaptive feedback, cleanup.
    async fn run_selected(
        &self,
        selected: Vec<SubagentDefinition>,
        task_text: &str,
        sink: Arc<dyn LiveViewSink>,
        cancel: &CancellationToken,
        parallel: bool,
    ) -> Result<RunOutcome, AdmissionError> {
        let concurrency = if parallel { self.parallelism_baseline(&selected).await } else { 1 };

        // Unique per invocation so `max_parallel_subagents_per_run` /
        // `max_parallel_teammates_per_team` bound this run's own dispatch
        // rather than being shared across every concurrent run.
        let tenant_key = format!("run-{}", Uuid::new_v4());
        let (lease, reservation) = self
            .admission
            .acquire_dispatch_permit(
                tenant_key,
                QueuePriority::User,
                selected.len() as u32,
                selected.len() as u32,
                Duration::from_millis(self.config.capacity_wait_ms),
                cancel,
            )
            .await
            .map_err(|reason| AdmissionError::Denied { reasons: vec![reason] })?;
        reservation.consume();
        tracing::info!(agent_count = selected.len(), parallel, concurrency, "run admitted");

        let heartbeat_cancel = cancel.child_token();
        let heartbeat = async {
            let mut ticker = tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = ticker.tick() => reservation.heartbeat().await,
                }
            }
        };

        let harnesses = self.harnesses.clone();
        let gate = self.gate.clone();
        let config = self.config.clone();
        let task_text_owned = task_text.to_string();
        let pool_cancel = cancel.clone();
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms.max(1));

        let dispatch = crate::pool::run_pool(
            selected.clone(),
            concurrency.max(1) as usize,
            move |index, agent: SubagentDefinition, item_cancel| {
                let harnesses = harnesses.clone();
                let gate = gate.clone();
                let config = config.clone();
                let sink = sink.clone();
                let task_text = task_text_owned.clone();
                async move { Ok::<ItemOutcome, anyhow::Error>(execute_one_item(&harnesses, &gate, &config, sink.as_ref(), index, agent, &task_text, idle_timeout, &item_cancel).await) }
            },
            |_, _| 1,
            crate::pool::PoolOptions { cancel: pool_cancel, abort_on_error: false, settle_mode: crate::pool::SettleMode::AllSettled, use_priority_scheduling: false },
        );

        let slots = tokio::select! {
            result = dispatch => result,
            _ = heartbeat => unreachable!("heartbeat loop only exits via cancellation"),
        };

        heartbeat_cancel.cancel();
        reservation.release().await;
        self.admission.release_orchestration(&lease).await;

        let slots = slots.map_err(|_| AdmissionError::Denied { reasons: vec![] })?;

        let mut items = Vec::with_capacity(selected.len());
        for (agent, slot) in selected.iter().zip(slots.into_iter()) {
            let now = Utc::now();
            let outcome = match slot {
                crate::pool::Slot::Ok(outcome) => outcome,
                crate::pool::Slot::Err(e) => ItemOutcome {
                    agent_id: agent.id,
                    agent_name: agent.name.clone(),
                    run_id: Uuid::new_v4(),
                    started_at: now,
                    finished_at: now,
                    status: OutcomeCode::NonretryableFailure,
                    output: None,
                    error: Some(e.to_string()),
                },
                crate::pool::Slot::NotRun => ItemOutcome {
                    agent_id: agent.id,
                    agent_name: agent.name.clone(),
                    run_id: Uuid::new_v4(),
                    started_at: now,
                    finished_at: now,
                    status: OutcomeCode::Cancelled,
                    output: None,
                    error: Some("not dispatched before cancellation".to_string()),
                },
            };
            if outcome.status != OutcomeCode::Cancelled {
                self.record_run(agent, outcome.run_id, &task_text_owned, outcome.started_at, &outcome);
            }
            self.apply_feedback(agent, &outcome);
            items.push(outcome);
        }

        let (outcome_code, retry_recommended) = if cancel.is_cancelled() {
            (OutcomeCode::Cancelled, OutcomeCode::Cancelled.retry_recommended())
        } else {
            aggregate(&items)
        };
        tracing::info!(%outcome_code, retry_recommended, item_count = items.len(), "run finished");
        Ok(RunOutcome { outcome_code, retry_recommended, items })
    }

    /// `baseline := min(configuredLimit, activeAgents, maxTotalActiveLlm, providerCap)`,
    /// then `effective := applyAdaptivePenalty(baseline)` (spec §4.7).
    async fn parallelism_baseline(&self, selected: &[SubagentDefinition]) -> u32 {
        let configured_limit = self.config.max_parallel_subagents_per_run;
        let active_agents = selected.len() as u32;
        let max_total_llm = self.config.max_total_active_llm;

        let mut provider_cap = u32::MAX;
        for agent in selected {
            let key = self.rate_key(agent);
            if let Ok(limit) = self.rate_controller.effective_limit(&key).await {
                provider_cap = provider_cap.min(limit);
            }
        }
        if provider_cap == u32::MAX {
            provider_cap = configured_limit;
        }

        let baseline = configured_limit.min(active_agents).min(max_total_llm).min(provider_cap).max(1);
        self.penalty.apply(baseline)
    }

    /// Raise the penalty and record the pressure event on a failure
    /// classified `rate_limit`/`capacity`; lower it on a clean run
    /// (spec §4.7 step 6).
    fn apply_feedback(&self, agent: &SubagentDefinition, outcome: &ItemOutcome) {
        let key = self.rate_key(agent);
        let rate_controller = self.rate_controller.clone();
        let parallelism = self.parallelism.clone();
        let penalty = self.penalty.clone();
        let key_for_task = key.clone();

        let event = match outcome.status {
            OutcomeCode::Success => {
                penalty.lower();
                RateEvent::Success
            }
            OutcomeCode::Timeout => {
                penalty.raise();
                RateEvent::Timeout
            }
            OutcomeCode::RetryableFailure => {
                let is_rate_limit = outcome.error.as_deref().is_some_and(|e| e.to_lowercase().contains("rate"));
                penalty.raise();
                if is_rate_limit {
                    RateEvent::RateLimited
                } else {
                    RateEvent::Error
                }
            }
            OutcomeCode::NonretryableFailure | OutcomeCode::Cancelled | OutcomeCode::PartialSuccess => RateEvent::Error,
        };

        tokio::spawn(async move {
            if let Err(e) = rate_controller.record(&key_for_task, event).await {
                tracing::warn!(key = %key_for_task, error = %e, "failed to record rate controller event");
            }
            match event {
                RateEvent::Success => parallelism.record_response_time(&key_for_task, 0).await,
                RateEvent::RateLimited => parallelism.record_429(&key_for_task).await,
                RateEvent::Timeout => parallelism.record_timeout(&key_for_task).await,
                RateEvent::Error => parallelism.record_error(&key_for_task).await,
            }
        });
        let _ = key;
    }

    fn record_run(&self, agent: &SubagentDefinition, run_id: Uuid, task_text: &str, started_at: chrono::DateTime<Utc>, outcome: &ItemOutcome) {
        let finished_at = Utc::now();
        let status = if outcome.status == OutcomeCode::Success { RunStatus::Completed } else { RunStatus::Failed };

        let record = SubagentRunRecord {
            run_id,
            agent_id: agent.id,
            task_text: task_text.to_string(),
            status,
            started_at,
            finished_at,
            latency_ms: (finished_at - started_at).num_milliseconds(),
            output_path: format!("runs/{run_id}.json"),
            error_summary: outcome.error.clone(),
        };
        if let Err(e) = self.storage.record_run(record) {
            tracing::warn!(run_id = %run_id, error = %e, "failed to append run record (best-effort)");
        }

        let payload = RunPayload {
            run_id,
            agent_id: agent.id,
            task_text: task_text.to_string(),
            status,
            started_at,
            finished_at,
            events: vec![AgentEventRecord {
                at: finished_at,
                kind: "completed".to_string(),
                text: outcome.output.clone(),
                fields: serde_json::Map::new(),
            }],
            output: outcome.output.clone(),
            error: outcome.error.clone(),
        };
        if let Err(e) = self.runs.save(&payload) {
            tracing::warn!(run_id = %run_id, error = %e, "failed to persist run payload (best-effort)");
        }
    }

    /// `run-dag` (spec §4.6, §4.7): execute a validated task graph,
    /// dispatching each node through the same per-task execution helper
    /// used by `run-single`/`run-parallel`.
    pub async fn run_dag(
        &self,
        plan: &TaskPlan,
        sink: Arc<dyn LiveViewSink>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<(Vec<DagTaskResult>, DagOutcomeStatus)> {
        let agents = self.storage.list_agents()?;
        let agents_by_id: HashMap<Uuid, SubagentDefinition> = agents.into_iter().map(|a| (a.id, a)).collect();

        let harnesses = self.harnesses.clone();
        let config = self.config.clone();
        let gate = self.gate.clone();

        let options = DagExecutorOptions { max_concurrency: self.config.max_parallel_subagents_per_run as usize, abort_on_first_error: false, cancel: cancel.clone() };

        let agents_by_id = Arc::new(agents_by_id);
        let run_node = move |node: dag::TaskNode, context: HashMap<String, serde_json::Value>, node_cancel: CancellationToken| {
            let harnesses = harnesses.clone();
            let config = config.clone();
            let gate = gate.clone();
            let sink = sink.clone();
            let agents_by_id = agents_by_id.clone();

            async move {
                let assigned_agent_id = node
                    .assigned_agent_id
                    .ok_or_else(|| anyhow::anyhow!("node {} has no assigned agent", node.id))?;
                let agent = agents_by_id
                    .get(&assigned_agent_id)
                    .ok_or_else(|| anyhow::anyhow!("node {} references unknown agent {}", node.id, assigned_agent_id))?;
                let harness = harnesses
                    .get(agent.provider.as_deref().unwrap_or("default"))
                    .ok_or_else(|| anyhow::anyhow!("no harness registered for provider {:?}", agent.provider))?;

                let user_prompt = if context.is_empty() {
                    node.description.clone()
                } else {
                    format!("{}\n\nContext from completed dependencies:\n{}", node.description, serde_json::to_string_pretty(&context)?)
                };

                let run_id = Uuid::new_v4();
                let input = TaskExecInput {
                    run_id,
                    subagent_id: agent.id,
                    system_prompt: &agent.system_prompt,
                    user_prompt: &user_prompt,
                    working_dir: std::env::temp_dir().join(run_id.to_string()),
                    env_vars: HashMap::new(),
                    idle_timeout: Duration::from_millis(config.idle_timeout_ms.max(1)),
                    item_index: 0,
                    agent_name: &agent.name,
                };

                let rate_key = agent.rate_key("anthropic", "claude");
                match execute_task(harness.as_ref(), &rate_key, &gate, &config, &node_cancel, sink.as_ref(), input).await {
                    Ok(result) => Ok(serde_json::Value::String(result.sections.result)),
                    Err(err) => Err(anyhow::anyhow!(err.to_string())),
                }
            }
        };

        let (results, status) = dag::execute_dag(plan, options, run_node).await?;
        Ok((results, status))
    }
}

/// Per-agent body of `run_selected`'s pool dispatch. A free function
/// (rather than a `&self` method) so it can be captured into the
/// `'static` worker closure [`crate::pool::run_pool`] requires.
#[allow(clippy::too_many_arguments)]
async fn execute_one_item(
    harnesses: &HarnessRegistry,
    gate: &RateLimitGate,
    config: &RuntimeConfig,
    sink: &dyn LiveViewSink,
    index: usize,
    agent: SubagentDefinition,
    task_text: &str,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> ItemOutcome {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let Some(harness) = harnesses.get(agent.provider.as_deref().unwrap_or("default")) else {
        return ItemOutcome {
            agent_id: agent.id,
            agent_name: agent.name.clone(),
            run_id,
            started_at,
            finished_at: Utc::now(),
            status: OutcomeCode::NonretryableFailure,
            output: None,
            error: Some(format!("no harness registered for provider {:?}", agent.provider)),
        };
    };

    let input = TaskExecInput {
        run_id,
        subagent_id: agent.id,
        system_prompt: &agent.system_prompt,
        user_prompt: task_text,
        working_dir: std::env::temp_dir().join(run_id.to_string()),
        env_vars: HashMap::new(),
        idle_timeout,
        item_index: index,
        agent_name: &agent.name,
    };

    let rate_key = agent.rate_key("anthropic", "claude");
    let outcome = execute_task(harness.as_ref(), &rate_key, gate, config, cancel, sink, input).await;
    let finished_at = Utc::now();

    match outcome {
        Ok(result) => ItemOutcome {
            agent_id: agent.id,
            agent_name: agent.name,
            run_id,
            started_at,
            finished_at,
            status: OutcomeCode::Success,
            output: Some(result.sections.result),
            error: None,
        },
        Err(err) => ItemOutcome {
            agent_id: agent.id,
            agent_name: agent.name,
            run_id,
            started_at,
            finished_at,
            status: task_exec::outcome_of_retry_error(&err),
            output: None,
            error: Some(err.to_string()),
        },
    }
}
