//! Tests for TUI rendering.

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use arbor_core::{BranchRef, OperationKind, Snapshot, StatusSummary, WorktreeRecord};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    use crate::app::{App, AppMode};
    use crate::ui::{draw, status_markers};

    /// Create a `TestBackend` + `Terminal` of the given size and draw the app once.
    fn draw_app(width: u16, height: u16, app: &App) -> Terminal<TestBackend> {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| draw(frame, app)).unwrap();
        terminal
    }

    /// All cells of the buffer joined into one string, row by row.
    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    fn loaded_app() -> App {
        let mut app = App::new();
        let main = WorktreeRecord {
            is_main: true,
            is_active: true,
            ..WorktreeRecord::new("/src/repo", BranchRef::Named("main".into()))
        };
        let feature = WorktreeRecord {
            is_dirty: true,
            status: StatusSummary {
                ahead: 2,
                modified: 1,
                ..StatusSummary::default()
            },
            ..WorktreeRecord::new("/wt/repo/feature1", BranchRef::Named("feature1".into()))
        };
        app.set_snapshot(&Snapshot {
            generation: 3,
            records: vec![main, feature],
        });
        app.status = "Ready".to_string();
        app
    }

    #[test]
    fn render_empty_app() {
        let terminal = draw_app(80, 24, &App::new());
        assert!(screen_text(&terminal).contains("0 worktrees"));
    }

    #[test]
    fn render_lists_worktrees() {
        let terminal = draw_app(100, 12, &loaded_app());
        let text = screen_text(&terminal);
        assert!(text.contains("2 worktrees"));
        assert!(text.contains("feature1"));
        assert!(text.contains("/wt/repo/feature1"));
        assert!(text.contains("main"));
        assert!(text.contains("Ready"));
    }

    #[test]
    fn render_filtered_table_and_filter_bar() {
        let mut app = loaded_app();
        app.open_prompt(AppMode::Filter, None, "feat");
        app.set_filter("feat");
        let text = screen_text(&draw_app(100, 12, &app));
        assert!(text.contains("1 of 2 worktrees | filter: feat"));
        assert!(text.contains("/feat"));
        assert!(text.contains("/wt/repo/feature1"));
        assert!(!text.contains("/src/repo"));
    }

    #[test]
    fn render_marks_stale_and_running() {
        let mut app = loaded_app();
        app.stale = true;
        app.in_flight
            .insert(PathBuf::from("/wt/repo/feature1"), OperationKind::Remove);
        let text = screen_text(&draw_app(100, 12, &app));
        assert!(text.contains("[stale]"));
        assert!(text.contains("[1 running]"));
    }

    #[test]
    fn render_rename_dialog_shows_input() {
        let mut app = loaded_app();
        app.open_prompt(
            AppMode::RenameInput,
            Some(PathBuf::from("/wt/repo/feature1")),
            "feature1-renamed",
        );
        let text = screen_text(&draw_app(100, 16, &app));
        assert!(text.contains("Rename worktree"));
        assert!(text.contains("New name: feature1-renamed"));
    }

    #[test]
    fn render_force_remove_warns() {
        let mut app = loaded_app();
        app.open_prompt(
            AppMode::ConfirmRemove { force: true },
            Some(PathBuf::from("/wt/repo/feature1")),
            "",
        );
        let text = screen_text(&draw_app(100, 16, &app));
        assert!(text.contains("Remove worktree feature1?"));
        assert!(text.contains("Uncommitted changes will be lost."));
    }

    #[test]
    fn render_tiny_terminal_does_not_panic() {
        let mut app = loaded_app();
        app.open_prompt(AppMode::AddInput, None, "a-very-long-branch-name-here");
        draw_app(10, 4, &app);
    }

    #[test]
    fn markers_summarize_status() {
        let app = loaded_app();
        assert_eq!(status_markers(&app.records[0]), "");
        assert_eq!(status_markers(&app.records[1]), "* ↑2");

        let warned = WorktreeRecord {
            warning: Some("status failed".into()),
            ..WorktreeRecord::new("/wt/x", BranchRef::Detached)
        };
        assert_eq!(status_markers(&warned), "!");
    }
}
