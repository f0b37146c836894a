//! Core runtime for muster: admission control, adaptive rate limiting,
//! dynamic parallelism, retry-with-backoff, the harness adapter
//! interface, DAG execution, output validation, and the run orchestrator
//! that composes them into `run-single`/`run-parallel`/`run-dag`.

pub mod admission;
pub mod config;
pub mod dag;
pub mod error;
pub mod harness;
pub mod orchestrator;
pub mod parallelism;
pub mod pool;
pub mod rate;
pub mod retry;
pub mod validate;

pub use config::RuntimeConfig;
pub use error::{AdmissionError, AdmissionReason, OutcomeCode, PoolError, RetryError, SelectionError};
pub use orchestrator::{ItemOutcome, LiveViewEvent, LiveViewSink, NullSink, RunOrchestrator, RunOutcome};
