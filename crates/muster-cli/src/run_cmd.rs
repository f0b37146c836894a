//! `muster subagent run/run-parallel/run-dag`: the execution half of the
//! tool surface (`subagent_run`, `subagent_run_parallel`,
//! `subagent_run_dag`), each delegating straight to `RunOrchestrator`.

use std::sync::Arc;

use anyhow::{Context, Result};
use muster_core::dag::{toml_format, DagOutcomeStatus};
use muster_core::{LiveViewSink, RunOrchestrator, RunOutcome};
use muster_store::StorageStore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub async fn run_single(
    orchestrator: &RunOrchestrator,
    agent_id_str: &str,
    task_text: &str,
    sink: Arc<dyn LiveViewSink>,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let agent_id = Uuid::parse_str(agent_id_str).with_context(|| format!("invalid subagent ID: {agent_id_str}"))?;
    orchestrator.run_single(agent_id, task_text, sink, cancel).await.map_err(anyhow::Error::from)
}

pub async fn run_parallel(
    orchestrator: &RunOrchestrator,
    agent_ids: Option<Vec<String>>,
    task_text: &str,
    sink: Arc<dyn LiveViewSink>,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let parsed;
    let ids_ref = match agent_ids {
        Some(ids) => {
            parsed = ids.iter().map(|s| Uuid::parse_str(s)).collect::<Result<Vec<_>, _>>().context("invalid subagent ID in list")?;
            Some(parsed.as_slice())
        }
        None => None,
    };
    orchestrator.run_parallel(ids_ref, task_text, sink, cancel).await.map_err(anyhow::Error::from)
}

pub fn print_outcome(outcome: &RunOutcome) {
    println!("Outcome: {} (retry_recommended={})", outcome.outcome_code, outcome.retry_recommended);
    println!();
    for item in &outcome.items {
        println!("[{}] {} -- {}", item.agent_name, item.agent_id, item.status);
        if let Some(output) = &item.output {
            println!("  {output}");
        }
        if let Some(error) = &item.error {
            println!("  error: {error}");
        }
    }
}

pub async fn run_dag(
    orchestrator: &RunOrchestrator,
    storage: &StorageStore,
    plan_path: &str,
    sink: Arc<dyn LiveViewSink>,
    cancel: &CancellationToken,
) -> Result<DagOutcomeStatus> {
    let plan_toml = std::fs::read_to_string(plan_path).with_context(|| format!("failed to read plan file {plan_path}"))?;
    let agents = storage.list_agents()?;
    let agents_by_name: std::collections::HashMap<String, Uuid> = agents.iter().map(|a| (a.name.clone(), a.id)).collect();
    let plan = toml_format::parse(&plan_toml, &agents_by_name)?;

    let (results, outcome) = orchestrator.run_dag(&plan, sink, cancel).await?;

    println!("DAG outcome: {outcome:?}");
    println!();
    for result in &results {
        println!("[{:?}] {}", result.status, result.node_id);
        if let Some(error) = &result.error {
            println!("  error: {error}");
        }
    }

    Ok(outcome)
}

pub fn exit_code_for_dag(outcome: DagOutcomeStatus) -> i32 {
    match outcome {
        DagOutcomeStatus::Completed => 0,
        DagOutcomeStatus::Partial | DagOutcomeStatus::Failed => 1,
    }
}
