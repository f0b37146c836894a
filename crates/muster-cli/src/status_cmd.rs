//! `muster status`: admission snapshot plus a subagent summary rendered
//! as a table.

use anyhow::Result;
use muster_core::admission::AdmissionController;
use muster_store::StorageStore;

pub async fn run_status(admission: &AdmissionController, storage: &StorageStore) -> Result<()> {
    let snapshot = admission.snapshot().await;

    println!("Admission:");
    println!("  active requests:  {}/{}", snapshot.active_requests, snapshot.max_total_active_requests);
    println!("  active llm calls: {}/{}", snapshot.active_llm, snapshot.max_total_active_llm);
    println!(
        "  orchestrations:    {}/{}",
        snapshot.active_orchestration_ids.len(),
        snapshot.max_concurrent_orchestrations
    );
    if !snapshot.queued_tool_names.is_empty() {
        println!("  queued:            {}", snapshot.queued_tool_names.join(", "));
    }
    println!();

    let agents = storage.list_agents()?;
    let enabled = agents.iter().filter(|a| a.enabled).count();
    println!("Subagents: {} total, {} enabled", agents.len(), enabled);

    let runs = storage.list_runs()?;
    let completed = runs.iter().filter(|r| r.status == muster_store::RunStatus::Completed).count();
    println!("Runs (last {}): {} completed, {} failed", runs.len(), completed, runs.len() - completed);

    Ok(())
}
