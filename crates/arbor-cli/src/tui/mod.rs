//! Two-thread TUI orchestration.
//!
//! Terminal I/O runs on a dedicated OS thread; git work stays on the tokio
//! runtime inside the engine. Key presses reach the select loop through a
//! `tokio::sync::mpsc` channel and core outcomes through the engine's
//! broadcast channel.

mod input;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arbor_core::{Config, Engine};

use crate::app::App;
use crate::ui;

pub use input::{Intent, dispatch, handle_key};

/// Terminal events forwarded from the UI reader thread.
pub enum TermEvent {
    Key(crossterm::event::KeyEvent),
    Resize(u16, u16),
}

/// Run the interactive TUI until the user quits.
///
/// Starts the background refresh triggers the configuration asks for, enters
/// raw mode, spawns the terminal reader thread and runs the `select!` loop.
/// Returns the worktree the user jumped to, if any, once the terminal has
/// been restored.
pub async fn run(
    engine: &Engine,
    config: &Config,
    initial_filter: Option<&str>,
) -> anyhow::Result<Option<PathBuf>> {
    let cancel = CancellationToken::new();
    let base_dir: PathBuf = config.worktree_base_dir();

    // 1. Subscribe before the first pass so no event is missed.
    let mut core_rx = engine.subscribe();
    drop(engine.refresh());

    let auto_refresh = config
        .refresh_interval()
        .map(|interval| engine.spawn_auto_refresh(interval, cancel.child_token()));
    let watcher = if config.refresh.watch_git_dir {
        match engine.watch_git_dir(cancel.child_token()).await {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "git dir watcher unavailable, relying on polling");
                None
            }
        }
    } else {
        None
    };

    // 2. Enter raw mode, create terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // 3. Spawn dedicated OS thread for crossterm::event::read()
    let (term_tx, mut term_rx) = tokio::sync::mpsc::channel::<TermEvent>(64);
    let cancel_clone = cancel.clone();
    let ui_thread = std::thread::spawn(move || {
        loop {
            if cancel_clone.is_cancelled() {
                break;
            }
            // Poll with 50ms timeout so we can check cancellation
            if event::poll(Duration::from_millis(50)).unwrap_or(false) {
                match event::read() {
                    Ok(Event::Key(key)) => {
                        // Filter out Release events (Windows emits Press + Release per keystroke)
                        if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            continue;
                        }
                        if term_tx.blocking_send(TermEvent::Key(key)).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Resize(w, h)) => {
                        if term_tx.blocking_send(TermEvent::Resize(w, h)).is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    });

    let mut app = App::new();
    app.sort_order = engine.sort_order();
    app.set_snapshot(&engine.snapshot());
    if let Some(query) = initial_filter {
        app.set_filter(query);
    }
    let mut tick = tokio::time::interval(Duration::from_millis(50));

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = terminal.draw(|f| ui::draw(f, &app)) {
                    break Err(e.into());
                }
            }
            Some(term_event) = term_rx.recv() => {
                input::handle_term_event(&mut app, engine, &base_dir, term_event);
            }
            core = core_rx.recv() => match core {
                Ok(event) => {
                    app.handle_core_event(&event);
                    app.set_snapshot(&engine.snapshot());
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Missed events only cost status text; the snapshot is authoritative.
                    warn!(skipped, "core events lagged, resyncing");
                    let snapshot = engine.snapshot();
                    app.in_flight
                        .retain(|path, _| snapshot.get(path).is_some_and(|r| r.locked));
                    app.set_snapshot(&snapshot);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
        if app.should_quit {
            break Ok(());
        }
    };

    // 4. Shutdown: stop background work and the UI thread
    cancel.cancel();
    let _ = ui_thread.join(); // fast, <50ms due to poll timeout
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    if let Some(handle) = auto_refresh {
        let _ = handle.await;
    }
    info!("tui stopped");

    // 5. Restore terminal
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();

    result.map(|()| app.selection)
}
