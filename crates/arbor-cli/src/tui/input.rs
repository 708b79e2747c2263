//! Input handling for TUI key events.
//!
//! Keys are first turned into an [`Intent`] against the app state alone, so
//! the key map can be tested without an engine. [`dispatch`] then forwards
//! the intent to the engine, which runs it as a background task.

use std::path::{Path, PathBuf};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use arbor_core::{AddRequest, CancelOutcome, Engine, RemoveRequest, RenameRequest};

use crate::app::{App, AppMode};

use super::TermEvent;

/// What a key press asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Refresh,
    ToggleSort,
    Add { branch: String },
    Remove { path: PathBuf, force: bool },
    BeginRename { path: PathBuf },
    CancelRename { path: PathBuf },
    Rename { path: PathBuf, new_name: String },
}

/// Process a terminal event and forward any resulting intent.
pub fn handle_term_event(app: &mut App, engine: &Engine, base_dir: &Path, event: TermEvent) {
    match event {
        TermEvent::Key(key) => {
            if let Some(intent) = handle_key(app, key) {
                dispatch(app, engine, base_dir, intent);
            }
        }
        TermEvent::Resize(_, _) => { /* terminal auto-handles resize on next draw */ }
    }
}

/// Apply a key to the app state and return the intent it expresses.
pub fn handle_key(app: &mut App, key: KeyEvent) -> Option<Intent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return None;
    }
    match app.mode {
        AppMode::Normal => handle_normal_key(app, key.code),
        AppMode::ConfirmRemove { force } => handle_confirm_key(app, key.code, force),
        AppMode::RenameInput => handle_rename_key(app, key.code),
        AppMode::AddInput => handle_add_key(app, key.code),
        AppMode::Filter => {
            handle_filter_key(app, key.code);
            None
        }
    }
}

fn handle_normal_key(app: &mut App, code: KeyCode) -> Option<Intent> {
    match code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Char('r') => return Some(Intent::Refresh),
        KeyCode::Char('s') => return Some(Intent::ToggleSort),
        KeyCode::Enter => app.jump(),
        KeyCode::Char('/') => {
            let query = app.filter.clone();
            app.open_prompt(AppMode::Filter, None, &query);
        }
        KeyCode::Esc if !app.filter.is_empty() => app.set_filter(""),
        KeyCode::Char('a') => app.open_prompt(AppMode::AddInput, None, ""),
        KeyCode::Char(c @ ('d' | 'D')) => {
            let path = mutable_selection(app, "removed")?;
            app.open_prompt(AppMode::ConfirmRemove { force: c == 'D' }, Some(path), "");
        }
        KeyCode::Char('m') => {
            let path = mutable_selection(app, "renamed")?;
            let current = app.selected_record().map(|r| r.name()).unwrap_or_default();
            app.open_prompt(AppMode::RenameInput, Some(path.clone()), &current);
            return Some(Intent::BeginRename { path });
        }
        _ => {}
    }
    None
}

/// The selected worktree, if it is one an operation may touch.
fn mutable_selection(app: &mut App, verb: &str) -> Option<PathBuf> {
    let record = app.selected_record()?;
    let (path, name, is_main) = (record.path.clone(), record.name(), record.is_main);
    if is_main {
        app.status = format!("The main worktree cannot be {verb}");
        return None;
    }
    if app.is_busy(&path) {
        app.status = format!("{name} is busy");
        return None;
    }
    Some(path)
}

fn handle_confirm_key(app: &mut App, code: KeyCode, force: bool) -> Option<Intent> {
    match code {
        KeyCode::Char('y' | 'Y') | KeyCode::Enter => {
            let (_, target) = app.close_prompt();
            target.map(|path| Intent::Remove { path, force })
        }
        KeyCode::Char('n' | 'N') | KeyCode::Esc => {
            app.close_prompt();
            None
        }
        _ => None,
    }
}

fn handle_rename_key(app: &mut App, code: KeyCode) -> Option<Intent> {
    match code {
        KeyCode::Esc => {
            let (_, target) = app.close_prompt();
            target.map(|path| Intent::CancelRename { path })
        }
        KeyCode::Enter => {
            let unchanged = app
                .target
                .as_deref()
                .and_then(Path::file_name)
                .is_some_and(|name| name == app.input.trim());
            let (input, target) = app.close_prompt();
            let path = target?;
            if unchanged {
                return Some(Intent::CancelRename { path });
            }
            Some(Intent::Rename {
                path,
                new_name: input.trim().to_string(),
            })
        }
        other => {
            edit_input(app, other);
            None
        }
    }
}

fn handle_add_key(app: &mut App, code: KeyCode) -> Option<Intent> {
    match code {
        KeyCode::Esc => {
            app.close_prompt();
            None
        }
        KeyCode::Enter => {
            let (input, _) = app.close_prompt();
            let branch = input.trim().to_string();
            (!branch.is_empty()).then_some(Intent::Add { branch })
        }
        other => {
            edit_input(app, other);
            None
        }
    }
}

/// The filter stays applied when the prompt closes.
fn handle_filter_key(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Enter | KeyCode::Esc => {
            app.close_prompt();
        }
        other => {
            edit_input(app, other);
            let query = app.input.clone();
            app.set_filter(&query);
        }
    }
}

fn edit_input(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char(c) => app.insert_char(c),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_pos = 0,
        KeyCode::End => app.cursor_pos = app.input.len(),
        _ => {}
    }
}

/// Forward an intent to the engine. Outcomes come back as core events.
pub fn dispatch(app: &mut App, engine: &Engine, base_dir: &Path, intent: Intent) {
    match intent {
        Intent::Refresh => drop(engine.refresh()),
        Intent::ToggleSort => {
            let order = engine.sort_order().toggled();
            engine.set_sort_order(order);
            app.sort_order = order;
            app.set_snapshot(&engine.snapshot());
        }
        Intent::Add { branch } => {
            let target_path = engine.default_target(base_dir, &branch);
            drop(engine.request_add(AddRequest {
                branch,
                target_path,
                create_branch: true,
                base_ref: None,
            }));
        }
        Intent::Remove { path, force } => {
            drop(engine.request_remove(RemoveRequest { path, force }));
        }
        Intent::BeginRename { path } => engine.begin_rename(&path),
        Intent::CancelRename { path } => {
            if engine.request_cancel(&path) == CancelOutcome::Cancelled {
                app.status = "Rename cancelled".to_string();
            }
        }
        Intent::Rename { path, new_name } => {
            drop(engine.request_rename(RenameRequest { path, new_name }));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arbor_core::{BranchRef, Snapshot, WorktreeRecord};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app_with_worktrees() -> App {
        let mut app = App::new();
        let main = WorktreeRecord {
            is_main: true,
            ..WorktreeRecord::new("/src/repo", BranchRef::Named("main".into()))
        };
        let feature = WorktreeRecord::new("/wt/repo/feature1", BranchRef::Named("feature1".into()));
        app.set_snapshot(&Snapshot {
            generation: 1,
            records: vec![main, feature],
        });
        app
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            assert_eq!(handle_key(app, key(KeyCode::Char(c))), None);
        }
    }

    #[test]
    fn ctrl_c_quits_from_any_mode() {
        let mut app = app_with_worktrees();
        app.open_prompt(AppMode::AddInput, None, "");
        handle_key(&mut app, KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);
    }

    #[test]
    fn rename_flow_produces_begin_then_rename() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Char('j')));

        let begin = handle_key(&mut app, key(KeyCode::Char('m')));
        assert_eq!(
            begin,
            Some(Intent::BeginRename {
                path: PathBuf::from("/wt/repo/feature1")
            })
        );
        assert_eq!(app.mode, AppMode::RenameInput);
        assert_eq!(app.input, "feature1");

        type_text(&mut app, "-renamed");
        let rename = handle_key(&mut app, key(KeyCode::Enter));
        assert_eq!(
            rename,
            Some(Intent::Rename {
                path: PathBuf::from("/wt/repo/feature1"),
                new_name: "feature1-renamed".into(),
            })
        );
        assert_eq!(app.mode, AppMode::Normal);
    }

    #[test]
    fn escape_cancels_rename_draft() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Char('j')));
        handle_key(&mut app, key(KeyCode::Char('m')));
        type_text(&mut app, "xyz");

        let intent = handle_key(&mut app, key(KeyCode::Esc));
        assert_eq!(
            intent,
            Some(Intent::CancelRename {
                path: PathBuf::from("/wt/repo/feature1")
            })
        );
        assert_eq!(app.mode, AppMode::Normal);
        assert!(app.input.is_empty());
    }

    #[test]
    fn confirming_unchanged_name_cancels() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Down));
        handle_key(&mut app, key(KeyCode::Char('m')));
        assert_eq!(
            handle_key(&mut app, key(KeyCode::Enter)),
            Some(Intent::CancelRename {
                path: PathBuf::from("/wt/repo/feature1")
            })
        );
    }

    #[test]
    fn main_worktree_cannot_be_removed_or_renamed() {
        let mut app = app_with_worktrees();
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('d'))), None);
        assert_eq!(app.mode, AppMode::Normal);
        assert!(app.status.contains("cannot be removed"));
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('m'))), None);
        assert_eq!(app.mode, AppMode::Normal);
    }

    #[test]
    fn force_remove_needs_confirmation() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Down));
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('D'))), None);
        assert_eq!(app.mode, AppMode::ConfirmRemove { force: true });

        let intent = handle_key(&mut app, key(KeyCode::Char('y')));
        assert_eq!(
            intent,
            Some(Intent::Remove {
                path: PathBuf::from("/wt/repo/feature1"),
                force: true,
            })
        );
    }

    #[test]
    fn declined_remove_does_nothing() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Down));
        handle_key(&mut app, key(KeyCode::Char('d')));
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('n'))), None);
        assert_eq!(app.mode, AppMode::Normal);
        assert!(app.target.is_none());
    }

    #[test]
    fn busy_worktree_is_not_offered() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Down));
        app.in_flight.insert(
            PathBuf::from("/wt/repo/feature1"),
            arbor_core::OperationKind::Rename,
        );
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('m'))), None);
        assert!(app.status.contains("busy"));
    }

    #[test]
    fn add_prompt_ignores_blank_branch() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Char('a')));
        assert_eq!(handle_key(&mut app, key(KeyCode::Enter)), None);

        handle_key(&mut app, key(KeyCode::Char('a')));
        type_text(&mut app, "hotfix");
        assert_eq!(
            handle_key(&mut app, key(KeyCode::Enter)),
            Some(Intent::Add {
                branch: "hotfix".into()
            })
        );
    }

    #[test]
    fn enter_jumps_to_selected_worktree() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Down));
        assert_eq!(handle_key(&mut app, key(KeyCode::Enter)), None);
        assert!(app.should_quit);
        assert_eq!(app.selection, Some(PathBuf::from("/wt/repo/feature1")));
    }

    #[test]
    fn filter_narrows_table_while_typing() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Char('/')));
        assert_eq!(app.mode, AppMode::Filter);

        type_text(&mut app, "feat");
        assert_eq!(app.records.len(), 1);
        assert_eq!(app.filter, "feat");
        // q and j are text while filtering
        type_text(&mut app, "q");
        assert!(!app.should_quit);
        assert!(app.records.is_empty());
        handle_key(&mut app, key(KeyCode::Backspace));
        assert_eq!(app.records.len(), 1);

        handle_key(&mut app, key(KeyCode::Enter));
        assert_eq!(app.mode, AppMode::Normal);
        assert_eq!(app.filter, "feat");
        assert_eq!(app.records.len(), 1);

        handle_key(&mut app, key(KeyCode::Enter));
        assert_eq!(app.selection, Some(PathBuf::from("/wt/repo/feature1")));
    }

    #[test]
    fn escape_in_normal_mode_clears_filter() {
        let mut app = app_with_worktrees();
        handle_key(&mut app, key(KeyCode::Char('/')));
        type_text(&mut app, "feature1");
        handle_key(&mut app, key(KeyCode::Esc));
        assert_eq!(app.records.len(), 1);

        handle_key(&mut app, key(KeyCode::Char('/')));
        assert_eq!(app.input, "feature1");
        handle_key(&mut app, key(KeyCode::Esc));

        handle_key(&mut app, key(KeyCode::Esc));
        assert!(app.filter.is_empty());
        assert_eq!(app.records.len(), 2);
        assert_eq!(app.selected_record().unwrap().name(), "feature1");
    }

    #[test]
    fn normal_mode_shortcuts() {
        let mut app = app_with_worktrees();
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('r'))), Some(Intent::Refresh));
        assert_eq!(handle_key(&mut app, key(KeyCode::Char('s'))), Some(Intent::ToggleSort));
        handle_key(&mut app, key(KeyCode::Char('q')));
        assert!(app.should_quit);
    }
}
