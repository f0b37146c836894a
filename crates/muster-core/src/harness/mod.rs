//! Harness adapter interface for LLM subagent processes (spec §6).
//!
//! Defines the [`Harness`] trait all adapters implement, its supporting
//! types ([`AgentHandle`], [`AgentEvent`], [`MaterializedTask`]), the
//! [`HarnessRegistry`] for runtime lookup by provider name, and one
//! concrete adapter, [`ProcessHarness`].

pub mod process;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use process::{CommandTemplate, ProcessHarness};
pub use registry::HarnessRegistry;
pub use trait_def::Harness;
pub use types::{AgentEvent, AgentHandle, MaterializedTask};
