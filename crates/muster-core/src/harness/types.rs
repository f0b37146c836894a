//! Supporting types for the [`super::trait_def::Harness`] adapter
//! interface: the materialized prompt a harness spawns, the handle it
//! returns, and the event stream it yields.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::process::ChildStdin;
use uuid::Uuid;

/// A fully-resolved prompt ready to hand to a harness adapter. Built by
/// the orchestrator from a `SubagentDefinition` plus the caller's input
/// and, on a recovery attempt, a stricter system prompt suffix.
#[derive(Debug)]
pub struct MaterializedTask {
    pub run_id: Uuid,
    pub subagent_id: Uuid,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Set on the one recovery attempt after an empty-output failure
    /// (spec §4.5); harnesses may append stricter output instructions.
    pub strict_prompt: bool,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// Everything the orchestrator needs to talk to a spawned agent process.
pub struct AgentHandle {
    pub pid: u32,
    pub stdin: Option<ChildStdin>,
    pub run_id: Uuid,
    pub attempt: u32,
    pub harness_name: String,
}

/// A normalized event from an agent's output stream (spec §6 "live-view
/// event stream"). Harness implementations translate their own wire
/// format into these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Message { role: String, content: String },
    ToolCall { tool: String, input: serde_json::Value },
    ToolResult { tool: String, output: serde_json::Value },
    TokenUsage { input_tokens: u64, output_tokens: u64 },
    Error { message: String },
    Completed,
}
