//! Subagent selection (spec §4.7 step 1): resolve target subagent(s) by
//! id or default to every enabled agent, rejecting disabled or missing
//! ids.

use uuid::Uuid;

use muster_store::SubagentDefinition;

use crate::error::SelectionError;

/// `ids = None` selects every enabled agent (run-parallel's default
/// mode); `ids = Some(..)` selects exactly those ids and rejects a
/// disabled or unknown one outright rather than silently skipping it.
pub fn select_agents(agents: &[SubagentDefinition], ids: Option<&[Uuid]>) -> Result<Vec<SubagentDefinition>, SelectionError> {
    let chosen: Vec<SubagentDefinition> = match ids {
        Some(ids) => {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let agent = agents.iter().find(|a| &a.id == id).ok_or(SelectionError::UnknownAgent { id: *id })?;
                if !agent.enabled {
                    return Err(SelectionError::DisabledAgent { id: agent.id, name: agent.name.clone() });
                }
                out.push(agent.clone());
            }
            out
        }
        None => agents.iter().filter(|a| a.enabled).cloned().collect(),
    };

    if chosen.is_empty() {
        return Err(SelectionError::Empty);
    }
    Ok(chosen)
}
