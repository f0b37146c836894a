//! `ProcessHarness` -- a `Harness` adapter that spawns a configurable
//! subprocess command template and parses its stdout as JSONL
//! stream-events, for an arbitrary provider/model binary rather than a
//! hardcoded one.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_def::Harness;
use super::types::{AgentEvent, AgentHandle, MaterializedTask};

struct ProcessState {
    child: Child,
    stdout: Option<ChildStdout>,
}

/// A subprocess command template: a program plus fixed argv, with the
/// materialized system prompt appended under `prompt_flag` at spawn time
/// (e.g. `program = "claude"`, `prompt_flag = "--append-system-prompt"`).
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: String,
    pub base_args: Vec<String>,
    pub prompt_flag: String,
}

/// Harness adapter for a subprocess that speaks line-delimited JSON on
/// stdout (`{"type": "...", ...}` per line), one instance per registered
/// provider name.
#[derive(Clone)]
pub struct ProcessHarness {
    name: String,
    template: CommandTemplate,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
    kill_grace: Duration,
}

impl ProcessHarness {
    /// `kill_grace` is the SIGTERM-to-SIGKILL grace period
    /// (`RuntimeConfig::kill_grace_ms`); callers not wired to a
    /// `RuntimeConfig` can use [`Self::new`], which keeps the documented
    /// default of 500ms.
    pub fn with_kill_grace(name: impl Into<String>, template: CommandTemplate, kill_grace: Duration) -> Self {
        Self { name: name.into(), template, processes: Arc::new(Mutex::new(HashMap::new())), kill_grace }
    }

    pub fn new(name: impl Into<String>, template: CommandTemplate) -> Self {
        Self::with_kill_grace(name, template, Duration::from_millis(500))
    }
}

impl std::fmt::Debug for ProcessHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHarness").field("name", &self.name).field("program", &self.template.program).finish()
    }
}

fn parse_stream_json_line(line: &str) -> Result<Vec<AgentEvent>> {
    let v: serde_json::Value = serde_json::from_str(line).context("malformed JSON in stream output")?;
    let mut events = Vec::new();
    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "assistant" => {
            if let Some(message) = v.get("message") {
                if let Some(content_arr) = message.get("content").and_then(|c| c.as_array()) {
                    for block in content_arr {
                        let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
                        match block_type {
                            "text" => {
                                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                    events.push(AgentEvent::Message { role: "assistant".to_string(), content: text.to_string() });
                                }
                            }
                            "tool_use" => {
                                let tool_name = block.get("name").and_then(|n| n.as_str()).unwrap_or("unknown").to_string();
                                let input = block.get("input").cloned().unwrap_or(serde_json::Value::Null);
                                events.push(AgentEvent::ToolCall { tool: tool_name, input });
                            }
                            _ => {}
                        }
                    }
                }
                if let Some(usage) = message.get("usage") {
                    let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    let output_tokens = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    if input_tokens > 0 || output_tokens > 0 {
                        events.push(AgentEvent::TokenUsage { input_tokens, output_tokens });
                    }
                }
            }
        }
        "tool_use" => {
            let tool_name = v.get("name").or_else(|| v.get("tool")).and_then(|n| n.as_str()).unwrap_or("unknown").to_string();
            let input = v.get("input").cloned().unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolCall { tool: tool_name, input });
        }
        "tool_result" => {
            let tool_name = v.get("name").or_else(|| v.get("tool")).and_then(|n| n.as_str()).unwrap_or("unknown").to_string();
            let output = v.get("output").or_else(|| v.get("content")).cloned().unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolResult { tool: tool_name, output });
        }
        "result" => {
            if let Some(result_text) = v.get("result").and_then(|r| r.as_str()) {
                events.push(AgentEvent::Message { role: "assistant".to_string(), content: result_text.to_string() });
            }
            if let Some(usage) = v.get("usage") {
                let input_tokens = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let output_tokens = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                if input_tokens > 0 || output_tokens > 0 {
                    events.push(AgentEvent::TokenUsage { input_tokens, output_tokens });
                }
            }
        }
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message").and_then(|m| m.as_str()))
                .or_else(|| v.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unknown error")
                .to_string();
            events.push(AgentEvent::Error { message });
        }
        other => {
            debug!(event_type = other, "ignoring unrecognised stream-json event type");
        }
    }

    Ok(events)
}

#[async_trait]
impl Harness for ProcessHarness {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle> {
        let mut system_prompt = task.system_prompt.clone();
        if task.strict_prompt {
            system_prompt.push_str(
                "\n\nYour previous attempt produced no usable output. Respond with a non-empty \
                 SUMMARY, RESULT, and NEXT_STEP this time.",
            );
        }
        system_prompt.push_str(&format!("\n\n{}", task.user_prompt));

        let mut cmd = Command::new(&self.template.program);
        for arg in &self.template.base_args {
            cmd.arg(arg);
        }
        cmd.arg(&self.template.prompt_flag).arg(&system_prompt);
        cmd.current_dir(&task.working_dir);
        for (key, value) in &task.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::null());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}' -- is it installed and on PATH?", self.template.program))?;
        let pid = child.id().context("child process has no pid")?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        self.processes.lock().await.insert(pid, ProcessState { child, stdout });

        Ok(AgentHandle { pid, stdin, run_id: task.run_id, attempt: 0, harness_name: self.name().to_string() })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let pid = handle.pid;
        let processes = Arc::clone(&self.processes);

        let stream = async_stream::stream! {
            let stdout = {
                let mut procs = processes.lock().await;
                procs.get_mut(&pid).and_then(|state| state.stdout.take())
            };

            let Some(stdout) = stdout else {
                warn!(pid, "no stdout available for pid -- events already consumed or process missing");
                yield AgentEvent::Error { message: "stdout not available (already consumed or process not found)".to_string() };
                yield AgentEvent::Completed;
                return;
            };

            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match parse_stream_json_line(trimmed) {
                            Ok(events) => {
                                for event in events {
                                    yield event;
                                }
                            }
                            Err(e) => warn!(line = trimmed, error = %e, "skipping malformed JSONL line"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading agent stdout");
                        yield AgentEvent::Error { message: format!("stdout read error: {e}") };
                        break;
                    }
                }
            }

            yield AgentEvent::Completed;
        };

        Box::pin(stream)
    }

    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<()> {
        let _ = handle;
        let _ = message;
        bail!("send() is not supported once stdin has been taken by AgentHandle; write to it directly instead")
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<()> {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            #[cfg(unix)]
            {
                // SAFETY: pid is a valid u32 from a child we spawned.
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }

            let exited = tokio::time::timeout(self.kill_grace, state.child.wait()).await;
            match exited {
                Ok(Ok(_status)) => debug!(pid, "process exited after SIGTERM"),
                _ => {
                    debug!(pid, "process did not exit within grace period, sending SIGKILL");
                    let _ = state.child.kill().await;
                }
            }

            processes.remove(&pid);
        } else {
            debug!(pid, "kill called but process not in map (already exited?)");
        }

        Ok(())
    }

    async fn is_running(&self, handle: &AgentHandle) -> bool {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            match state.child.try_wait() {
                Ok(Some(_status)) => {
                    processes.remove(&pid);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid, error = %e, "error checking process status");
                    false
                }
            }
        } else {
            false
        }
    }
}
