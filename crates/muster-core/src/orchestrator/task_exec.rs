//! Single-task execution (spec §4.7 steps 2-6), run once per item inside
//! `run-single` / `run-parallel` / `run-dag`: spawn the harness, collect
//! events, and score the transcript against a well-formedness check
//! instead of a single overall timeout, events reset a per-chunk idle
//! timeout (spec §5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{OutcomeCode, RetryError};
use crate::harness::{AgentEvent, Harness, MaterializedTask};
use crate::orchestrator::live_view::{LiveViewEvent, LiveViewSink};
use crate::retry::{run_with_retry, AttemptError, RateLimitGate};
use crate::validate::{self, ParsedSections, ValidationOutcome};

pub struct TaskExecInput<'a> {
    pub run_id: Uuid,
    pub subagent_id: Uuid,
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
    pub idle_timeout: Duration,
    pub item_index: usize,
    pub agent_name: &'a str,
}

pub struct TaskExecOutcome {
    pub sections: ParsedSections,
    /// Whether the one allowed empty-output recovery attempt (spec
    /// §4.5, §4.7) was actually used.
    pub recovery_used: bool,
}

/// Run one task end to end: spawn through `harness`, collect its event
/// stream with a resetting idle timeout, validate the accumulated
/// output, and retry exactly once (with a strictened prompt) on an
/// empty-output failure. Emits live-view events throughout.
pub async fn execute_task(
    harness: &dyn Harness,
    rate_key: &str,
    gate: &RateLimitGate,
    config: &RuntimeConfig,
    cancel: &CancellationToken,
    sink: &dyn LiveViewSink,
    input: TaskExecInput<'_>,
) -> Result<TaskExecOutcome, RetryError> {
    sink.emit(LiveViewEvent::ItemStarted { index: input.item_index, agent_name: input.agent_name.to_string() });

    let recovery_used = Arc::new(AtomicBool::new(false));

    let attempt_result = run_with_retry(rate_key, gate, config, cancel, |attempt, use_strict_prompt| {
        let recovery_used = recovery_used.clone();
        async move {
            if use_strict_prompt {
                recovery_used.store(true, Ordering::SeqCst);
            }
            let timeout = if use_strict_prompt {
                input.idle_timeout.min(Duration::from_millis(config.recovery_timeout_ms))
            } else {
                input.idle_timeout
            };
            run_one_attempt(harness, &input, timeout, attempt, use_strict_prompt, cancel, sink).await
        }
    })
    .await;

    let recovery_used = recovery_used.load(Ordering::SeqCst);

    match attempt_result {
        Ok(sections) => {
            sink.emit(LiveViewEvent::Finished {
                index: input.item_index,
                status: OutcomeCode::Success,
                summary: sections.summary.clone(),
                error: None,
            });
            Ok(TaskExecOutcome { sections, recovery_used })
        }
        Err(err) => {
            let status = outcome_of_retry_error(&err);
            sink.emit(LiveViewEvent::Finished {
                index: input.item_index,
                status,
                summary: String::new(),
                error: Some(err.to_string()),
            });
            Err(err)
        }
    }
}

pub fn outcome_of_retry_error(err: &RetryError) -> OutcomeCode {
    match err {
        RetryError::Cancelled { .. } => OutcomeCode::Cancelled,
        RetryError::Timeout { .. } => OutcomeCode::Timeout,
        RetryError::Exhausted { .. } => OutcomeCode::RetryableFailure,
        RetryError::Nonretryable { .. } => OutcomeCode::NonretryableFailure,
    }
}

async fn run_one_attempt(
    harness: &dyn Harness,
    input: &TaskExecInput<'_>,
    idle_timeout: Duration,
    attempt: u32,
    use_strict_prompt: bool,
    cancel: &CancellationToken,
    sink: &dyn LiveViewSink,
) -> Result<ParsedSections, AttemptError> {
    let system_prompt = if use_strict_prompt {
        format!(
            "{}\n\nYour previous attempt produced no usable output. Respond with exactly three sections: SUMMARY, RESULT, NEXT_STEP.",
            input.system_prompt
        )
    } else {
        input.system_prompt.to_string()
    };

    let task = MaterializedTask {
        run_id: input.run_id,
        subagent_id: input.subagent_id,
        system_prompt,
        user_prompt: input.user_prompt.to_string(),
        strict_prompt: use_strict_prompt,
        working_dir: input.working_dir.clone(),
        env_vars: input.env_vars.clone(),
    };

    let mut handle = harness.spawn(&task).await.map_err(|source| AttemptError::Transient { status: None, source })?;

    if let Some(mut stdin) = handle.stdin.take() {
        use tokio::io::AsyncWriteExt;
        if let Err(e) = stdin.write_all(input.user_prompt.as_bytes()).await {
            tracing::warn!(run_id = %input.run_id, attempt, error = %e, "failed to write prompt to agent stdin");
        }
    }

    let mut stream = harness.events(&handle);
    let mut transcript = String::new();
    let mut saw_completed = false;
    let mut stream_error: Option<String> = None;

    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(event)) => match event {
                AgentEvent::Message { content, .. } => {
                    sink.emit(LiveViewEvent::StdoutChunk { index: input.item_index, text: content.clone() });
                    if !transcript.is_empty() {
                        transcript.push('\n');
                    }
                    transcript.push_str(&content);
                }
                AgentEvent::ToolResult { output, .. } => {
                    transcript.push('\n');
                    transcript.push_str(&output.to_string());
                }
                AgentEvent::Error { message } => {
                    sink.emit(LiveViewEvent::StderrChunk { index: input.item_index, text: message.clone() });
                    stream_error = Some(message);
                }
                AgentEvent::ToolCall { .. } | AgentEvent::TokenUsage { .. } => {}
                AgentEvent::Completed => {
                    saw_completed = true;
                    break;
                }
            },
            Ok(None) => break,
            Err(_elapsed) => {
                tracing::warn!(run_id = %input.run_id, attempt, "idle timeout, killing agent");
                let _ = harness.kill(&handle).await;
                return Err(AttemptError::Timeout);
            }
        }

        if cancel.is_cancelled() {
            let _ = harness.kill(&handle).await;
            return Err(AttemptError::Cancelled);
        }
    }

    if !saw_completed {
        let _ = harness.kill(&handle).await;
    }

    if let Some(message) = stream_error {
        if is_rate_limit_message(&message) {
            return Err(AttemptError::RateLimited { status: None });
        }
        return Err(AttemptError::Transient { status: None, source: anyhow::anyhow!(message) });
    }

    match validate::evaluate(&transcript, false) {
        ValidationOutcome::WellFormed(sections) | ValidationOutcome::Normalized(sections) => Ok(sections),
        ValidationOutcome::Rejected { .. } => Err(AttemptError::EmptyOutput),
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JitterMode;
    use crate::orchestrator::live_view::NullSink;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    /// `None` for an attempt means "the agent hangs" -- its stream never
    /// yields, for exercising the idle-timeout path.
    struct ScriptedHarness {
        events: AsyncMutex<Vec<Option<Vec<AgentEvent>>>>,
        kills: Mutex<u32>,
    }

    impl ScriptedHarness {
        fn new(attempts: Vec<Option<Vec<AgentEvent>>>) -> Self {
            Self { events: AsyncMutex::new(attempts), kills: Mutex::new(0) }
        }
    }

    #[async_trait]
    impl Harness for ScriptedHarness {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn spawn(&self, task: &MaterializedTask) -> anyhow::Result<crate::harness::AgentHandle> {
            Ok(crate::harness::AgentHandle {
                pid: 1,
                stdin: None,
                run_id: task.run_id,
                attempt: 0,
                harness_name: "scripted".to_string(),
            })
        }

        fn events(&self, _handle: &crate::harness::AgentHandle) -> Pin<Box<dyn futures::Stream<Item = AgentEvent> + Send>> {
            let next = {
                let mut events = self.events.try_lock().expect("test harness is single-threaded");
                if events.is_empty() { Some(Vec::new()) } else { events.remove(0) }
            };
            match next {
                Some(events) => Box::pin(futures::stream::iter(events)),
                None => Box::pin(futures::stream::pending()),
            }
        }

        async fn send(&self, _handle: &crate::harness::AgentHandle, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &crate::harness::AgentHandle) -> anyhow::Result<()> {
            *self.kills.lock().unwrap() += 1;
            Ok(())
        }

        async fn is_running(&self, _handle: &crate::harness::AgentHandle) -> bool {
            false
        }
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig { initial_delay_ms: 1, max_delay_ms: 2, jitter_mode: JitterMode::None, ..RuntimeConfig::default() }
    }

    fn well_formed_event() -> AgentEvent {
        AgentEvent::Message {
            role: "assistant".to_string(),
            content: "SUMMARY: did it\nRESULT: the task is fully done and verified end to end\nNEXT_STEP: none".to_string(),
        }
    }

    fn input(idle_timeout: Duration) -> TaskExecInput<'static> {
        TaskExecInput {
            run_id: Uuid::nil(),
            subagent_id: Uuid::nil(),
            system_prompt: "you are a test agent",
            user_prompt: "do the thing",
            working_dir: PathBuf::from("/tmp"),
            env_vars: HashMap::new(),
            idle_timeout,
            item_index: 0,
            agent_name: "test-agent",
        }
    }

    #[tokio::test]
    async fn well_formed_output_succeeds_on_first_attempt() {
        let harness = ScriptedHarness::new(vec![Some(vec![well_formed_event(), AgentEvent::Completed])]);
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();
        let config = fast_config();
        let sink = NullSink;

        let outcome = execute_task(&harness, "k", &gate, &config, &cancel, &sink, input(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!outcome.recovery_used);
        assert_eq!(outcome.sections.summary, "did it");
    }

    #[tokio::test]
    async fn empty_output_triggers_one_recovery_attempt_then_succeeds() {
        let harness = ScriptedHarness::new(vec![
            Some(vec![AgentEvent::Message { role: "assistant".to_string(), content: "ok".to_string() }, AgentEvent::Completed]),
            Some(vec![well_formed_event(), AgentEvent::Completed]),
        ]);
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();
        let config = fast_config();
        let sink = NullSink;

        let outcome = execute_task(&harness, "k", &gate, &config, &cancel, &sink, input(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(outcome.recovery_used);
    }

    #[tokio::test]
    async fn error_event_classified_as_rate_limit_is_retried() {
        let harness = ScriptedHarness::new(vec![
            Some(vec![AgentEvent::Error { message: "429 too many requests".to_string() }]),
            Some(vec![well_formed_event(), AgentEvent::Completed]),
        ]);
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();
        let config = fast_config();
        let sink = NullSink;

        let outcome = execute_task(&harness, "k", &gate, &config, &cancel, &sink, input(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome.sections.result, "the task is fully done and verified end to end");
    }

    #[tokio::test]
    async fn recovery_attempt_timeout_is_capped_independently_of_idle_timeout() {
        // First attempt reports empty output; the recovery attempt then
        // hangs. With a large idle_timeout but a small recovery_timeout_ms,
        // the recovery attempt must surface a timeout well before
        // idle_timeout would have elapsed.
        let harness = ScriptedHarness::new(vec![
            Some(vec![AgentEvent::Message { role: "assistant".to_string(), content: "ok".to_string() }, AgentEvent::Completed]),
            None,
        ]);
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();
        let config = RuntimeConfig { recovery_timeout_ms: 20, ..fast_config() };
        let sink = NullSink;

        let started = std::time::Instant::now();
        let err = execute_task(&harness, "k", &gate, &config, &cancel, &sink, input(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5), "recovery attempt should have been capped, not run the full idle_timeout");
    }

    #[tokio::test]
    async fn idle_timeout_kills_the_process_and_surfaces_timeout() {
        let harness = ScriptedHarness::new(vec![None]);
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();
        let config = fast_config();
        let sink = NullSink;

        let err = execute_task(&harness, "k", &gate, &config, &cancel, &sink, input(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Timeout { .. }));
        assert_eq!(*harness.kills.lock().unwrap(), 1);
    }
}
