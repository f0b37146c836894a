//! TOML on-disk format for `plan.toml`, keyed by task **id** rather than
//! name (spec §3 invariant: "ids unique within plan") and carrying an
//! optional `assigned_agent` name resolved against the agent registry at
//! load time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Priority, TaskNode, TaskPlan};

/// Top-level structure of a `plan.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanToml {
    pub plan: PlanMeta,
    #[serde(default)]
    pub tasks: Vec<TaskToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
}

/// A single `[[tasks]]` entry, keyed by `id` (not `name`) so `depends_on`
/// references are unambiguous across renames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskToml {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_context_selector: Option<String>,
}

/// Parse a `plan.toml` document into a [`TaskPlan`], resolving each
/// node's `assigned_agent` name against `agents_by_name`. A task that
/// names an unknown agent is left unassigned (the DAG executor surfaces
/// that as a per-node failure rather than rejecting the whole plan at
/// parse time).
pub fn parse(toml_str: &str, agents_by_name: &std::collections::HashMap<String, Uuid>) -> anyhow::Result<TaskPlan> {
    let parsed: PlanToml = toml::from_str(toml_str)?;
    let id = parsed.plan.id.unwrap_or_else(Uuid::new_v4);

    let nodes = parsed
        .tasks
        .into_iter()
        .map(|t| TaskNode {
            id: t.id,
            description: t.description,
            assigned_agent_id: t.assigned_agent.and_then(|name| agents_by_name.get(&name).copied()),
            dependencies: t.depends_on,
            priority: t.priority,
            input_context_selector: t.input_context_selector,
        })
        .collect();

    Ok(TaskPlan { id, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_plan_with_unassigned_task() {
        let toml_str = r#"
            [plan]
            name = "demo"

            [[tasks]]
            id = "t1"
            description = "do something"
        "#;
        let plan = parse(toml_str, &std::collections::HashMap::new()).unwrap();
        assert_eq!(plan.nodes.len(), 1);
        assert_eq!(plan.nodes[0].id, "t1");
        assert!(plan.nodes[0].assigned_agent_id.is_none());
    }

    #[test]
    fn resolves_assigned_agent_by_name() {
        let agent_id = Uuid::new_v4();
        let mut agents = std::collections::HashMap::new();
        agents.insert("reviewer".to_string(), agent_id);

        let toml_str = r#"
            [plan]
            name = "demo"

            [[tasks]]
            id = "t1"
            description = "review the diff"
            assigned_agent = "reviewer"
        "#;
        let plan = parse(toml_str, &agents).unwrap();
        assert_eq!(plan.nodes[0].assigned_agent_id, Some(agent_id));
    }

    #[test]
    fn parses_dependencies_and_priority() {
        let toml_str = r#"
            [plan]
            name = "demo"

            [[tasks]]
            id = "a"
            description = "first"

            [[tasks]]
            id = "b"
            description = "second"
            depends_on = ["a"]
            priority = "high"
        "#;
        let plan = parse(toml_str, &std::collections::HashMap::new()).unwrap();
        assert_eq!(plan.nodes[1].dependencies, vec!["a"]);
        assert_eq!(plan.nodes[1].priority, Priority::High);
    }
}
