//! Live-view dashboard: renders the [`LiveViewEvent`] stream from a
//! `run`/`run-parallel`/`run-dag` invocation in place, rather than
//! polling a database from a separate dashboard command.

pub mod app;
mod sink;
mod ui;

use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use muster_core::LiveViewEvent;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

use app::App;
pub use sink::ChannelSink;

/// Drive the dashboard until the run finishes or the user quits. Returns
/// once every known item has reached a terminal status and the channel
/// has drained, or immediately on `q` / Ctrl-C.
pub async fn run_dashboard(mut rx: UnboundedReceiver<LiveViewEvent>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    let result = run_event_loop(&mut terminal, &mut app, &mut rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    rx: &mut UnboundedReceiver<LiveViewEvent>,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);

    loop {
        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(event) => app.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
        if closed && app.all_finished() {
            break;
        }

        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => app.should_quit = true,
                    KeyCode::Char('j') | KeyCode::Down => app.move_down(),
                    KeyCode::Char('k') | KeyCode::Up => app.move_up(),
                    _ => {}
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    terminal.draw(|f| ui::render(f, app))?;
    Ok(())
}
