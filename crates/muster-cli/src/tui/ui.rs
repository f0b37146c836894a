//! Dashboard layout: a list of in-flight items plus a detail pane for
//! the selected one.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};
use ratatui::Frame;

use muster_core::error::OutcomeCode;

use super::app::{App, ItemStatus};

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(f.area());

    render_list(f, app, chunks[0]);
    render_detail(f, app, chunks[1]);
}

fn status_style(status: &ItemStatus) -> (Style, &'static str) {
    match status {
        ItemStatus::Running => (Style::default().fg(Color::Yellow), "RUNNING"),
        ItemStatus::Finished(OutcomeCode::Success) => (Style::default().fg(Color::Green), "SUCCESS"),
        ItemStatus::Finished(OutcomeCode::PartialSuccess) => (Style::default().fg(Color::Green), "PARTIAL"),
        ItemStatus::Finished(OutcomeCode::Cancelled) => (Style::default().fg(Color::Gray), "CANCELLED"),
        ItemStatus::Finished(_) => (Style::default().fg(Color::Red), "FAILED"),
    }
}

fn render_list(f: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .items
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let (style, label) = status_style(&row.status);
            let mut line = vec![
                Span::styled(format!("{label:<10}"), style),
                Span::raw(row.agent_name.clone()),
            ];
            if i == app.selected {
                line[1] = Span::styled(row.agent_name.clone(), Style::default().add_modifier(Modifier::BOLD));
            }
            ListItem::new(Line::from(line))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Items"));
    f.render_widget(list, area);
}

fn render_detail(f: &mut Frame, app: &App, area: Rect) {
    let text = match app.items.get(app.selected) {
        Some(row) => {
            let mut lines = vec![Line::from(format!("agent: {}", row.agent_name))];
            if let Some(last_line) = &row.last_line {
                lines.push(Line::from(last_line.clone()));
            }
            if let Some(error) = &row.error {
                lines.push(Line::from(Span::styled(format!("error: {error}"), Style::default().fg(Color::Red))));
            }
            lines
        }
        None => vec![Line::from("no items yet")],
    };

    let paragraph = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Detail (q to quit)"));
    f.render_widget(paragraph, area);
}
