//! The `Harness` trait -- the adapter interface for agent runtimes.
//!
//! Each concrete harness (a specific provider/model's CLI) implements
//! this trait. The trait is intentionally object-safe so it can be
//! stored as `Box<dyn Harness>` in [`super::HarnessRegistry`].

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use super::types::{AgentEvent, AgentHandle, MaterializedTask};

/// Adapter interface for spawning and managing LLM subagent processes.
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed trait object, so
/// `Box<dyn Harness>` can be stored in collections such as
/// [`super::HarnessRegistry`].
#[async_trait]
pub trait Harness: Send + Sync {
    /// Human-readable name this harness is registered under (matches a
    /// subagent's `provider`).
    fn name(&self) -> &str;

    /// Spawn a subprocess for `task`.
    ///
    /// Implementations should set `task.working_dir` as the current
    /// directory, inject `task.env_vars`, and return an [`AgentHandle`]
    /// carrying the process id and stdin.
    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle>;

    /// Stream of events from a running agent, terminated by
    /// [`AgentEvent::Completed`].
    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

    /// Send a text message to the agent's stdin (conversation
    /// continuation).
    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<()>;

    /// Terminate the agent process: SIGTERM, then SIGKILL after 500ms if
    /// it hasn't exited (spec §6).
    async fn kill(&self, handle: &AgentHandle) -> Result<()>;

    /// Whether the agent process is still alive.
    async fn is_running(&self, handle: &AgentHandle) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct NoopHarness;

    #[async_trait]
    impl Harness for NoopHarness {
        fn name(&self) -> &str {
            "noop"
        }

        async fn spawn(&self, _task: &MaterializedTask) -> Result<AgentHandle> {
            Ok(AgentHandle { pid: 0, stdin: None, run_id: Uuid::nil(), attempt: 0, harness_name: "noop".to_string() })
        }

        fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &AgentHandle) -> Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &AgentHandle) -> bool {
            false
        }
    }

    #[test]
    fn harness_is_object_safe() {
        let harness: Box<dyn Harness> = Box::new(NoopHarness);
        assert_eq!(harness.name(), "noop");
    }

    #[tokio::test]
    async fn noop_harness_spawn_and_query() {
        let harness: Box<dyn Harness> = Box::new(NoopHarness);
        let task = MaterializedTask {
            run_id: Uuid::new_v4(),
            subagent_id: Uuid::new_v4(),
            system_prompt: "you are a test".to_string(),
            user_prompt: "do the thing".to_string(),
            strict_prompt: false,
            working_dir: std::path::PathBuf::from("/tmp"),
            env_vars: std::collections::HashMap::new(),
        };

        let handle = harness.spawn(&task).await.unwrap();
        assert_eq!(handle.pid, 0);
        assert_eq!(handle.harness_name, "noop");
        assert!(!harness.is_running(&handle).await);
        harness.send(&handle, "hello").await.unwrap();
        harness.kill(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn noop_harness_events_stream_is_empty() {
        use futures::StreamExt;

        let harness = NoopHarness;
        let handle = AgentHandle { pid: 0, stdin: None, run_id: Uuid::nil(), attempt: 0, harness_name: "noop".to_string() };
        let events: Vec<AgentEvent> = harness.events(&handle).collect().await;
        assert!(events.is_empty());
    }
}
