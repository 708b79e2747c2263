//! TUI rendering functions.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use unicode_width::UnicodeWidthStr;

use arbor_core::{SortOrder, WorktreeRecord};

use crate::app::{App, AppMode};

/// Draw the full UI.
pub fn draw(frame: &mut Frame<'_>, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Worktrees
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_worktrees(frame, app, chunks[1]);
    draw_status_bar(frame, app, chunks[2]);

    match app.mode {
        AppMode::Normal | AppMode::Filter => {}
        AppMode::ConfirmRemove { force } => draw_remove_dialog(frame, app, force),
        AppMode::RenameInput => draw_input_dialog(frame, app, "Rename worktree", "New name"),
        AppMode::AddInput => draw_input_dialog(frame, app, "Add worktree", "Branch"),
    }
}

fn draw_header(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let sort = match app.sort_order {
        SortOrder::Path => "by path",
        SortOrder::ActiveFirst => "active first",
    };
    let stale = if app.stale { " [stale]" } else { "" };
    let busy = if app.in_flight.is_empty() {
        String::new()
    } else {
        format!(" [{} running]", app.in_flight.len())
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Arbor",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | {} | {sort}", count_label(app))),
        Span::styled(stale, Style::default().fg(Color::Red)),
        Span::styled(busy, Style::default().fg(Color::Yellow)),
    ]));

    frame.render_widget(header, area);
}

fn count_label(app: &App) -> String {
    if app.filter.trim().is_empty() {
        format!("{} worktrees", app.records.len())
    } else {
        format!(
            "{} of {} worktrees | filter: {}",
            app.records.len(),
            app.all.len(),
            app.filter.trim()
        )
    }
}

/// Compact markers: `*` dirty, `↑n`/`↓n` ahead/behind, `!` warning.
pub fn status_markers(record: &WorktreeRecord) -> String {
    let mut parts = Vec::new();
    if record.is_dirty {
        parts.push("*".to_string());
    }
    if record.status.ahead > 0 {
        parts.push(format!("↑{}", record.status.ahead));
    }
    if record.status.behind > 0 {
        parts.push(format!("↓{}", record.status.behind));
    }
    if record.warning.is_some() {
        parts.push("!".to_string());
    }
    parts.join(" ")
}

fn draw_worktrees(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let header = Row::new(["", "Name", "Branch", "Status", "Path"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.records.iter().map(|record| {
        let tag = if record.is_main {
            "M"
        } else if record.is_active {
            ">"
        } else {
            ""
        };
        let mut style = Style::default();
        if app.is_busy(&record.path) || record.locked {
            style = style.fg(Color::Yellow);
        } else if record.warning.is_some() {
            style = style.fg(Color::Red);
        } else if record.is_active {
            style = style.fg(Color::Green);
        }
        Row::new([
            Cell::from(tag),
            Cell::from(record.name()),
            Cell::from(record.branch.to_string()),
            Cell::from(status_markers(record)),
            Cell::from(record.path.display().to_string()),
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Length(10),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Worktrees "))
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = TableState::default();
    if !app.records.is_empty() {
        state.select(Some(app.selected));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn draw_status_bar(frame: &mut Frame<'_>, app: &App, area: Rect) {
    if app.mode == AppMode::Filter {
        draw_filter_bar(frame, app, area);
        return;
    }
    let keys = match app.mode {
        AppMode::Normal if !app.filter.is_empty() => {
            " | Enter: jump | /: filter | Esc: clear filter | q: quit"
        }
        AppMode::Normal => {
            " | Enter: jump | /: filter | a: add | d/D: remove | m: rename | r: refresh | s: sort | q: quit"
        }
        AppMode::Filter => "",
        AppMode::ConfirmRemove { .. } => " | y: confirm | n: cancel",
        AppMode::RenameInput | AppMode::AddInput => " | Enter: confirm | Esc: cancel",
    };
    let status = Paragraph::new(Line::from(vec![
        Span::styled(&app.status, Style::default().fg(Color::DarkGray)),
        Span::styled(keys, Style::default().fg(Color::DarkGray)),
    ]));

    frame.render_widget(status, area);
}

fn draw_filter_bar(frame: &mut Frame<'_>, app: &App, area: Rect) {
    let bar = Paragraph::new(Line::from(vec![
        Span::styled("/", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(app.input.as_str()),
        Span::styled(
            "  Enter/Esc: done",
            Style::default().fg(Color::DarkGray),
        ),
    ]));
    frame.render_widget(bar, area);

    let column = 1 + UnicodeWidthStr::width(&app.input[..app.cursor_pos]);
    let x = area
        .x
        .saturating_add(u16::try_from(column).unwrap_or(u16::MAX))
        .min(area.x + area.width.saturating_sub(1));
    frame.set_cursor_position((x, area.y));
}

/// A `width` x `height` rectangle centred in `area`, shrunk to fit.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4)).max(1);
    let height = height.min(area.height.saturating_sub(2)).max(1);
    Rect::new(
        area.x + (area.width.saturating_sub(width)) / 2,
        area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    )
}

fn target_name(app: &App) -> String {
    app.target
        .as_deref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn draw_remove_dialog(frame: &mut Frame<'_>, app: &App, force: bool) {
    let dialog_area = centered(frame.area(), 60, 7);
    frame.render_widget(Clear, dialog_area);

    let title = if force { " Force remove " } else { " Remove " };
    let mut text = vec![
        Line::from(Span::styled(
            format!("Remove worktree {}?", target_name(app)),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(
            app.target
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        ),
    ];
    if force {
        text.push(Line::from(Span::styled(
            "Uncommitted changes will be lost.",
            Style::default().fg(Color::Red),
        )));
    }
    text.push(Line::from(vec![
        Span::styled(
            "[Y]",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" Remove  "),
        Span::styled(
            "[N]",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" Cancel"),
    ]));

    let dialog = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    frame.render_widget(dialog, dialog_area);
}

fn draw_input_dialog(frame: &mut Frame<'_>, app: &App, title: &str, label: &str) {
    let dialog_area = centered(frame.area(), 60, 5);
    frame.render_widget(Clear, dialog_area);

    let mut text = Vec::new();
    if app.mode == AppMode::RenameInput {
        text.push(Line::from(Span::styled(
            format!("Renaming {}", target_name(app)),
            Style::default().fg(Color::Yellow),
        )));
    }
    text.push(Line::from(vec![
        Span::styled(
            format!("{label}: "),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.input.as_str()),
    ]));

    let dialog = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {title} ")),
    );
    frame.render_widget(dialog, dialog_area);

    // Cursor after the label, measured in display columns.
    let line = u16::from(app.mode == AppMode::RenameInput);
    let before_cursor = UnicodeWidthStr::width(&app.input[..app.cursor_pos]);
    let column = UnicodeWidthStr::width(label) + 2 + before_cursor;
    let x = dialog_area
        .x
        .saturating_add(1)
        .saturating_add(u16::try_from(column).unwrap_or(u16::MAX));
    let max_x = dialog_area.x + dialog_area.width.saturating_sub(2);
    frame.set_cursor_position((x.min(max_x), dialog_area.y + 1 + line));
}
