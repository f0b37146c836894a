//! `muster runs`: list the bounded run history (`subagent_runs`), or show
//! one run's full payload when given a run ID.

use anyhow::{Context, Result};
use muster_store::{RunStore, StorageStore};
use uuid::Uuid;

pub fn run_list(storage: &StorageStore, limit: usize) -> Result<()> {
    let mut runs = storage.list_runs()?;
    runs.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
    runs.truncate(limit);

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!("{:<38} {:<38} {:<10} {:>10} {:<20}", "RUN ID", "AGENT ID", "STATUS", "LATENCY", "FINISHED");
    println!("{}", "-".repeat(120));
    for run in &runs {
        println!(
            "{:<38} {:<38} {:<10} {:>8}ms {:<20}",
            run.run_id,
            run.agent_id,
            run.status,
            run.latency_ms,
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub fn run_show(runs: &RunStore, run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str).with_context(|| format!("invalid run ID: {run_id_str}"))?;
    let payload = runs.load(run_id)?;

    println!("Run:    {}", payload.run_id);
    println!("Agent:  {}", payload.agent_id);
    println!("Status: {}", payload.status);
    println!("Task:   {}", payload.task_text);
    println!();

    if !payload.events.is_empty() {
        println!("Events:");
        for event in &payload.events {
            println!("  [{}] {}: {}", event.at.format("%H:%M:%S"), event.kind, event.text.as_deref().unwrap_or(""));
        }
        println!();
    }

    if let Some(output) = &payload.output {
        println!("Output:\n{output}");
    }
    if let Some(error) = &payload.error {
        println!("Error:\n{error}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use muster_store::{RunPayload, RunStatus, SubagentRunRecord};

    use super::*;

    #[test]
    fn run_list_and_show_render_a_recorded_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = StorageStore::new(dir.path());
        let runs = RunStore::new(dir.path());

        let run_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        let now = Utc::now();

        storage
            .record_run(SubagentRunRecord {
                run_id,
                agent_id,
                task_text: "do the thing".to_string(),
                status: RunStatus::Completed,
                started_at: now,
                finished_at: now,
                latency_ms: 42,
                output_path: format!("runs/{run_id}.json"),
                error_summary: None,
            })
            .unwrap();

        runs.save(&RunPayload {
            run_id,
            agent_id,
            task_text: "do the thing".to_string(),
            status: RunStatus::Completed,
            started_at: now,
            finished_at: now,
            events: Vec::new(),
            output: Some("done".to_string()),
            error: None,
        })
        .unwrap();

        run_list(&storage, 10).unwrap();
        run_show(&runs, &run_id.to_string()).unwrap();
    }

    #[test]
    fn run_show_rejects_malformed_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let runs = RunStore::new(dir.path());
        let err = run_show(&runs, "not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("invalid run ID"));
    }
}
