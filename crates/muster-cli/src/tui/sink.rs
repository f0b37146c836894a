//! [`LiveViewSink`] implementation that forwards events to the TUI's
//! event loop over a channel, so the orchestrator never blocks on
//! rendering.

use muster_core::{LiveViewEvent, LiveViewSink};
use tokio::sync::mpsc::UnboundedSender;

pub struct ChannelSink {
    tx: UnboundedSender<LiveViewEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<LiveViewEvent>) -> Self {
        Self { tx }
    }
}

impl LiveViewSink for ChannelSink {
    fn emit(&self, event: LiveViewEvent) {
        let _ = self.tx.send(event);
    }
}
