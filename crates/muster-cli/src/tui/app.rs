//! TUI application state: one row per in-flight item, fed by
//! [`super::sink::ChannelSink`] instead of polling a database.

use muster_core::error::OutcomeCode;
use muster_core::LiveViewEvent;

#[derive(Debug, Clone)]
pub enum ItemStatus {
    Running,
    Finished(OutcomeCode),
}

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub agent_name: String,
    pub status: ItemStatus,
    pub last_line: Option<String>,
    pub error: Option<String>,
}

pub struct App {
    pub items: Vec<ItemRow>,
    pub selected: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new() -> Self {
        Self { items: Vec::new(), selected: 0, should_quit: false }
    }

    pub fn apply(&mut self, event: LiveViewEvent) {
        match event {
            LiveViewEvent::ItemStarted { index, agent_name } => {
                if self.items.len() <= index {
                    self.items.resize_with(index + 1, || ItemRow {
                        agent_name: String::new(),
                        status: ItemStatus::Running,
                        last_line: None,
                        error: None,
                    });
                }
                self.items[index].agent_name = agent_name;
                self.items[index].status = ItemStatus::Running;
            }
            LiveViewEvent::StdoutChunk { index, text } | LiveViewEvent::StderrChunk { index, text } => {
                if let Some(row) = self.items.get_mut(index) {
                    row.last_line = text.lines().last().map(str::to_string).or(Some(text));
                }
            }
            LiveViewEvent::Finished { index, status, summary, error } => {
                if let Some(row) = self.items.get_mut(index) {
                    row.status = ItemStatus::Finished(status);
                    row.last_line = Some(summary);
                    row.error = error;
                }
            }
        }
    }

    pub fn all_finished(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| matches!(i.status, ItemStatus::Finished(_)))
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if !self.items.is_empty() && self.selected < self.items.len() - 1 {
            self.selected += 1;
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
