//! Shared test fixtures for `muster-core` and `muster-store`.
//!
//! This runtime keeps all state on disk rather than in a database, so
//! the fixture here is a scoped tempdir rather than a testcontainer.
//! The scriptable [`FakeHarness`] mirrors `task_exec.rs`'s in-module
//! `ScriptedHarness`, promoted to a public, reusable type so
//! integration tests outside `muster-core` can drive deterministic
//! agent runs without a real subprocess.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use muster_core::harness::{AgentEvent, AgentHandle, Harness, MaterializedTask};
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// A tempdir-backed muster state directory, torn down on drop.
///
/// Wraps a plain [`TempDir`] rather than pre-creating `runs/` or
/// `storage.json`, since `StorageStore`/`RunStore` create those lazily.
pub struct StateDirFixture {
    dir: TempDir,
}

impl StateDirFixture {
    pub fn new() -> Self {
        Self { dir: TempDir::new().expect("failed to create tempdir for state dir fixture") }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for StateDirFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A single scripted response for one `spawn` call: either a fixed
/// sequence of events, or `None` to simulate an agent that hangs
/// forever (exercises the idle-timeout path).
pub type ScriptedAttempt = Option<Vec<AgentEvent>>;

/// A `Harness` whose per-attempt event sequences are scripted in
/// advance, for deterministic orchestrator-level tests. Each call to
/// `spawn` consumes the next entry from the script in order; calling
/// past the end of the script yields an empty completed stream.
///
/// Tracks kill count so tests can assert a hung or erroring agent was
/// actually terminated.
pub struct FakeHarness {
    name: String,
    script: AsyncMutex<Vec<ScriptedAttempt>>,
    kills: StdMutex<u32>,
    spawns: StdMutex<u32>,
}

impl FakeHarness {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedAttempt>) -> Self {
        Self { name: name.into(), script: AsyncMutex::new(script), kills: StdMutex::new(0), spawns: StdMutex::new(0) }
    }

    /// A harness that always returns one well-formed `SUMMARY`/`RESULT`/`NEXT_STEP`
    /// response, useful when a test only cares about dispatch/concurrency
    /// behavior and not the content of any single run.
    pub fn always_succeeds(name: impl Into<String>) -> Self {
        Self::new(name, vec![Some(vec![well_formed_message(), AgentEvent::Completed])])
    }

    pub fn kill_count(&self) -> u32 {
        *self.kills.lock().unwrap()
    }

    pub fn spawn_count(&self) -> u32 {
        *self.spawns.lock().unwrap()
    }
}

/// A well-formed agent message satisfying [`muster_core::validate::evaluate`]'s
/// three-section contract.
pub fn well_formed_message() -> AgentEvent {
    AgentEvent::Message {
        role: "assistant".to_string(),
        content: "SUMMARY: done\nRESULT: the task completed successfully\nNEXT_STEP: none".to_string(),
    }
}

#[async_trait]
impl Harness for FakeHarness {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, task: &MaterializedTask) -> anyhow::Result<AgentHandle> {
        *self.spawns.lock().unwrap() += 1;
        Ok(AgentHandle { pid: 1, stdin: None, run_id: task.run_id, attempt: 0, harness_name: self.name.clone() })
    }

    fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let next = {
            let mut script = self.script.try_lock().expect("fake harness is not accessed concurrently per-call");
            if script.is_empty() { Some(Vec::new()) } else { script.remove(0) }
        };
        match next {
            Some(events) => Box::pin(futures::stream::iter(events)),
            None => Box::pin(futures::stream::pending()),
        }
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn kill(&self, _handle: &AgentHandle) -> anyhow::Result<()> {
        *self.kills.lock().unwrap() += 1;
        Ok(())
    }

    async fn is_running(&self, _handle: &AgentHandle) -> bool {
        false
    }
}

/// Build a minimal, valid `SubagentDefinition` for tests, with sensible
/// defaults overridable via the builder-style setters.
pub struct AgentBuilder {
    def: muster_store::SubagentDefinition,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            def: muster_store::SubagentDefinition {
                id: Uuid::new_v4(),
                name: name.into(),
                description: "test agent".to_string(),
                system_prompt: "you are a test agent".to_string(),
                provider: None,
                model: None,
                skill_tags: Vec::new(),
                enabled: true,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.def.provider = Some(provider.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.def.model = Some(model.into());
        self
    }

    pub fn build(self) -> muster_store::SubagentDefinition {
        self.def
    }
}

/// Build a `TaskPlan` fixture from `(id, depends_on)` pairs, all
/// unassigned and `Normal` priority unless adjusted afterward.
pub fn plan_from_edges(edges: &[(&str, &[&str])]) -> muster_core::dag::types::TaskPlan {
    let nodes = edges
        .iter()
        .map(|(id, deps)| muster_core::dag::types::TaskNode {
            id: id.to_string(),
            description: format!("task {id}"),
            assigned_agent_id: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            priority: muster_core::dag::types::Priority::default(),
            input_context_selector: None,
        })
        .collect();
    muster_core::dag::types::TaskPlan { id: Uuid::new_v4(), nodes }
}

/// Convenience map from agent name to id, built from a slice of
/// already-constructed definitions -- handy when resolving
/// `assigned_agent` names in a `plan.toml` fixture.
pub fn agents_by_name(agents: &[muster_store::SubagentDefinition]) -> HashMap<String, Uuid> {
    agents.iter().map(|a| (a.name.clone(), a.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_harness_replays_scripted_attempts_in_order() {
        let harness = FakeHarness::new("fake", vec![Some(vec![AgentEvent::Completed]), Some(vec![well_formed_message()])]);
        let task = MaterializedTask {
            run_id: Uuid::new_v4(),
            subagent_id: Uuid::new_v4(),
            system_prompt: "p".to_string(),
            user_prompt: "u".to_string(),
            strict_prompt: false,
            working_dir: std::path::PathBuf::from("/tmp"),
            env_vars: HashMap::new(),
        };
        let handle = harness.spawn(&task).await.unwrap();
        assert_eq!(harness.spawn_count(), 1);

        use futures::StreamExt;
        let first: Vec<AgentEvent> = harness.events(&handle).collect().await;
        assert_eq!(first, vec![AgentEvent::Completed]);
        let second: Vec<AgentEvent> = harness.events(&handle).collect().await;
        assert_eq!(second, vec![well_formed_message()]);
    }

    #[tokio::test]
    async fn fake_harness_tracks_kills() {
        let harness = FakeHarness::always_succeeds("fake");
        let task = MaterializedTask {
            run_id: Uuid::new_v4(),
            subagent_id: Uuid::new_v4(),
            system_prompt: "p".to_string(),
            user_prompt: "u".to_string(),
            strict_prompt: false,
            working_dir: std::path::PathBuf::from("/tmp"),
            env_vars: HashMap::new(),
        };
        let handle = harness.spawn(&task).await.unwrap();
        harness.kill(&handle).await.unwrap();
        harness.kill(&handle).await.unwrap();
        assert_eq!(harness.kill_count(), 2);
    }

    #[test]
    fn state_dir_fixture_path_exists() {
        let fixture = StateDirFixture::new();
        assert!(fixture.path().exists());
    }

    #[test]
    fn plan_from_edges_builds_expected_dependencies() {
        let plan = plan_from_edges(&[("a", &[]), ("b", &["a"])]);
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.node("b").unwrap().dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn agent_builder_sets_provider_and_model() {
        let agent = AgentBuilder::new("reviewer").provider("anthropic").model("claude-opus").build();
        assert_eq!(agent.name, "reviewer");
        assert_eq!(agent.provider.as_deref(), Some("anthropic"));
        assert_eq!(agent.model.as_deref(), Some("claude-opus"));
    }
}
