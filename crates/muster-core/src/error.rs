//! Error taxonomy (spec §7): `OutcomeCode` is the status code carried
//! end-to-end by every orchestrator entry point; the `thiserror` enums
//! below are structured, matchable errors at each component boundary.

use std::fmt;

/// Aggregate outcome of a `run-single` / `run-parallel` / `run-dag` call.
/// Not an error type — a status, hence no `thiserror::Error` derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    Success,
    PartialSuccess,
    RetryableFailure,
    NonretryableFailure,
    Timeout,
    Cancelled,
}

impl OutcomeCode {
    /// Whether a caller should be told to retry the call (spec §7, §4.7).
    pub fn retry_recommended(self) -> bool {
        matches!(self, OutcomeCode::RetryableFailure | OutcomeCode::Timeout)
    }

    /// Exit code for the CLI wrapper (spec §6): 0 on success or partial
    /// success with no retry recommendation, non-zero otherwise.
    pub fn exit_code(self) -> i32 {
        match self {
            OutcomeCode::Success => 0,
            OutcomeCode::PartialSuccess if !self.retry_recommended() => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeCode::Success => "SUCCESS",
            OutcomeCode::PartialSuccess => "PARTIAL_SUCCESS",
            OutcomeCode::RetryableFailure => "RETRYABLE_FAILURE",
            OutcomeCode::NonretryableFailure => "NONRETRYABLE_FAILURE",
            OutcomeCode::Timeout => "TIMEOUT",
            OutcomeCode::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// A structured admission-failure reason (spec §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionReason {
    MaxTotalRequests,
    MaxTotalLlm,
    MaxParallelSubagentsPerRun,
    MaxParallelTeammatesPerTeam,
    OrchestrationQueueFull,
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdmissionReason::MaxTotalRequests => "max_total_requests",
            AdmissionReason::MaxTotalLlm => "max_total_active_llm",
            AdmissionReason::MaxParallelSubagentsPerRun => "max_parallel_subagents_per_run",
            AdmissionReason::MaxParallelTeammatesPerTeam => "max_parallel_teammates_per_team",
            AdmissionReason::OrchestrationQueueFull => "orchestration_queue_full",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission denied: {}", reasons.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Denied { reasons: Vec<AdmissionReason> },

    #[error("admission wait cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("admission wait timed out after {attempts} attempts ({waited_ms}ms)")]
    TimedOut { attempts: u32, waited_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("concurrency pool aborted")]
    Aborted,

    #[error("worker {index} failed: {source}")]
    WorkerFailed {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    Cancelled,
    Timeout,
    EmptyOutput,
    RateLimit,
    Transient,
    Nonretryable,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("operation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("operation timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error(
        "retries exhausted after {attempts} attempt(s), last_status={last_status:?}, gate_wait_ms={gate_wait_ms}, gate_hits={gate_hits}: {source}"
    )]
    Exhausted {
        attempts: u32,
        last_status: Option<u16>,
        gate_wait_ms: u64,
        gate_hits: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("non-retryable failure: {source}")]
    Nonretryable {
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DagValidationError {
    #[error("duplicate task id: {id}")]
    DuplicateId { id: String },

    #[error("task {task} depends on unknown id {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle detected among: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },

    #[error("plan has no root task (every task has at least one dependency)")]
    NoRoot,

    #[error("plan has no tasks")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("unknown subagent id: {id}")]
    UnknownAgent { id: uuid::Uuid },

    #[error("subagent {id} ({name}) is disabled")]
    DisabledAgent { id: uuid::Uuid, name: String },

    #[error("no subagents selected")]
    Empty,
}
