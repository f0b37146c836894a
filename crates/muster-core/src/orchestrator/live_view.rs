//! Live-view event stream contract (spec §4.7 step 4, §6). The monitor
//! (a TUI, a log sink, or a test probe) implements [`LiveViewSink`] and
//! observes the run without participating in its control flow.

use crate::error::OutcomeCode;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveViewEvent {
    ItemStarted { index: usize, agent_name: String },
    StdoutChunk { index: usize, text: String },
    StderrChunk { index: usize, text: String },
    Finished { index: usize, status: OutcomeCode, summary: String, error: Option<String> },
}

pub trait LiveViewSink: Send + Sync {
    fn emit(&self, event: LiveViewEvent);
}

/// Discards every event; the default when no monitor is attached.
pub struct NullSink;

impl LiveViewSink for NullSink {
    fn emit(&self, _event: LiveViewEvent) {}
}
