//! `muster subagent list/create/configure`: the CRUD half of the tool
//! surface (`subagent_list`, `subagent_create`, `subagent_configure`)
//! backed directly by `StorageStore`, no orchestrator involved.

use anyhow::{Context, Result};
use chrono::Utc;
use muster_store::{StorageStore, SubagentDefinition};
use uuid::Uuid;

pub fn run_list(storage: &StorageStore) -> Result<()> {
    let agents = storage.list_agents()?;
    if agents.is_empty() {
        println!("No subagents defined. Create one with `muster subagent create`.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<10} {:<10} {:<8}", "ID", "NAME", "PROVIDER", "MODEL", "ENABLED");
    println!("{}", "-".repeat(92));
    for agent in &agents {
        println!(
            "{:<38} {:<20} {:<10} {:<10} {:<8}",
            agent.id,
            agent.name,
            agent.provider.as_deref().unwrap_or("(default)"),
            agent.model.as_deref().unwrap_or("(default)"),
            agent.enabled,
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_create(
    storage: &StorageStore,
    name: String,
    description: String,
    system_prompt: String,
    provider: Option<String>,
    model: Option<String>,
    skill_tags: Vec<String>,
) -> Result<()> {
    let now = Utc::now();
    let agent = SubagentDefinition {
        id: Uuid::new_v4(),
        name,
        description,
        system_prompt,
        provider,
        model,
        skill_tags,
        enabled: true,
        created_at: now,
        updated_at: now,
    };
    storage.upsert_agent(agent.clone())?;
    println!("Created subagent {} ({})", agent.name, agent.id);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_configure(
    storage: &StorageStore,
    id_str: &str,
    description: Option<String>,
    system_prompt: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    enabled: Option<bool>,
) -> Result<()> {
    let id = Uuid::parse_str(id_str).with_context(|| format!("invalid subagent ID: {id_str}"))?;
    let mut agent = storage.get_agent(id)?;

    if let Some(description) = description {
        agent.description = description;
    }
    if let Some(system_prompt) = system_prompt {
        agent.system_prompt = system_prompt;
    }
    if let Some(provider) = provider {
        agent.provider = Some(provider);
    }
    if let Some(model) = model {
        agent.model = Some(model);
    }
    if let Some(enabled) = enabled {
        agent.enabled = enabled;
    }
    agent.updated_at = Utc::now();

    storage.upsert_agent(agent.clone())?;
    println!("Updated subagent {} ({})", agent.name, agent.id);
    Ok(())
}
