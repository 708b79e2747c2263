//! Application state and types.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use arbor_core::{CoreEvent, ErrorKind, OperationKind, Snapshot, SortOrder, WorktreeRecord};

const LOADING: &str = "Loading worktrees...";

/// Application mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Normal,
    /// Remove confirmation for `App::target`.
    ConfirmRemove { force: bool },
    /// Editing the new name for `App::target`.
    RenameInput,
    /// Editing the branch name of a new worktree.
    AddInput,
    /// Editing the table filter; the table follows every keystroke.
    Filter,
}

/// TUI application state.
pub struct App {
    pub mode: AppMode,
    /// Every record of the current snapshot.
    pub all: Vec<WorktreeRecord>,
    /// The records shown, after the filter.
    pub records: Vec<WorktreeRecord>,
    pub filter: String,
    /// Generation of the snapshot currently shown.
    pub generation: u64,
    pub selected: usize,
    pub input: String,
    /// Byte offset into `input`, always on a char boundary.
    pub cursor_pos: usize,
    /// Worktree the open prompt refers to.
    pub target: Option<PathBuf>,
    pub in_flight: HashMap<PathBuf, OperationKind>,
    pub sort_order: SortOrder,
    /// The last listing failed; the table may be out of date.
    pub stale: bool,
    pub should_quit: bool,
    /// Worktree chosen to jump to when the TUI exits.
    pub selection: Option<PathBuf>,
    pub status: String,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            mode: AppMode::Normal,
            all: Vec::new(),
            records: Vec::new(),
            filter: String::new(),
            generation: 0,
            selected: 0,
            input: String::new(),
            cursor_pos: 0,
            target: None,
            in_flight: HashMap::new(),
            sort_order: SortOrder::default(),
            stale: false,
            should_quit: false,
            selection: None,
            status: LOADING.to_string(),
        }
    }

    /// Replace the table contents, keeping the selection on the same path.
    pub fn set_snapshot(&mut self, snapshot: &Snapshot) {
        self.all.clone_from(&snapshot.records);
        self.generation = snapshot.generation;
        self.apply_filter();
    }

    /// Replace the filter query and re-filter the table.
    pub fn set_filter(&mut self, query: &str) {
        query.clone_into(&mut self.filter);
        self.apply_filter();
    }

    /// Rebuild the visible rows from `all`, keeping the selection on the
    /// same path when it is still shown.
    fn apply_filter(&mut self) {
        let selected_path = self.selected_record().map(|r| r.path.clone());
        let query = self.filter.trim().to_lowercase();
        self.records = self
            .all
            .iter()
            .filter(|record| matches_filter(record, &query))
            .cloned()
            .collect();
        self.selected = selected_path
            .and_then(|path| self.records.iter().position(|r| r.path == path))
            .unwrap_or(self.selected)
            .min(self.records.len().saturating_sub(1));
    }

    pub fn selected_record(&self) -> Option<&WorktreeRecord> {
        self.records.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.records.is_empty() {
            self.selected = (self.selected + 1).min(self.records.len() - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Remember the selected worktree and quit.
    pub fn jump(&mut self) {
        if let Some(record) = self.selected_record() {
            self.selection = Some(record.path.clone());
            self.should_quit = true;
        }
    }

    pub fn is_busy(&self, path: &Path) -> bool {
        self.in_flight.contains_key(path)
    }

    /// Open a prompt in `mode`, pre-filling the input with `initial`.
    pub fn open_prompt(&mut self, mode: AppMode, target: Option<PathBuf>, initial: &str) {
        self.mode = mode;
        self.target = target;
        self.input = initial.to_string();
        self.cursor_pos = self.input.len();
    }

    /// Close any prompt and return its input and target.
    pub fn close_prompt(&mut self) -> (String, Option<PathBuf>) {
        self.mode = AppMode::Normal;
        self.cursor_pos = 0;
        (std::mem::take(&mut self.input), self.target.take())
    }

    pub fn insert_char(&mut self, c: char) {
        self.input.insert(self.cursor_pos, c);
        self.cursor_pos += c.len_utf8();
    }

    pub fn backspace(&mut self) {
        if let Some((idx, _)) = self.input[..self.cursor_pos].char_indices().next_back() {
            self.input.remove(idx);
            self.cursor_pos = idx;
        }
    }

    pub fn cursor_left(&mut self) {
        if let Some((idx, _)) = self.input[..self.cursor_pos].char_indices().next_back() {
            self.cursor_pos = idx;
        }
    }

    pub fn cursor_right(&mut self) {
        if let Some(c) = self.input[self.cursor_pos..].chars().next() {
            self.cursor_pos += c.len_utf8();
        }
    }

    /// Fold a core event into the status line and in-flight markers.
    pub fn handle_core_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::Reconciled { .. } => {
                if self.stale || self.status == LOADING {
                    self.status = "Ready".to_string();
                }
                self.stale = false;
            }
            CoreEvent::ReconciliationStale { message } => {
                self.stale = true;
                self.status = format!("List may be stale: {message}");
            }
            CoreEvent::RecordWarning { path, message } => {
                self.status = format!("Warning for {}: {message}", display_name(path));
            }
            CoreEvent::OperationStarted { path, kind } => {
                self.in_flight.insert(path.clone(), *kind);
                self.status = format!("{} {}...", progress_verb(*kind), display_name(path));
            }
            CoreEvent::OperationSucceeded { path, kind, record } => {
                self.in_flight.remove(path);
                self.status = match (kind, record) {
                    (OperationKind::Rename, Some(record)) => {
                        format!("Renamed {} to {}", display_name(path), record.name())
                    }
                    (OperationKind::Add, _) => format!("Created {}", display_name(path)),
                    (OperationKind::Remove, _) => format!("Removed {}", display_name(path)),
                    (OperationKind::Rename, None) => format!("Renamed {}", display_name(path)),
                };
            }
            CoreEvent::OperationFailed {
                path,
                kind,
                error_kind,
                message,
            } => {
                // A rejected duplicate says nothing about the operation that
                // holds the path.
                if *error_kind != ErrorKind::AlreadyInProgress {
                    self.in_flight.remove(path);
                }
                self.status = if *error_kind == ErrorKind::ManualRepairRequired {
                    format!("MANUAL REPAIR REQUIRED: {message}")
                } else {
                    format!("{kind} of {} failed: {message}", display_name(path))
                };
            }
        }
    }
}

/// Case-insensitive substring match on name and branch; on the path too
/// when the query contains a `/`. `query` is already trimmed and lowercased.
fn matches_filter(record: &WorktreeRecord, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    (record.is_main && "main".contains(query))
        || record.name().to_lowercase().contains(query)
        || record.branch.to_string().to_lowercase().contains(query)
        || (query.contains('/')
            && record.path.to_string_lossy().to_lowercase().contains(query))
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

const fn progress_verb(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Add => "Creating",
        OperationKind::Remove => "Removing",
        OperationKind::Rename => "Renaming",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use arbor_core::BranchRef;

    fn record(path: &str) -> WorktreeRecord {
        WorktreeRecord::new(path, BranchRef::Named("b".into()))
    }

    fn snapshot(paths: &[&str]) -> Snapshot {
        Snapshot {
            generation: 1,
            records: paths.iter().map(|p| record(p)).collect(),
        }
    }

    #[test]
    fn new_app_state() {
        let app = App::new();
        assert_eq!(app.mode, AppMode::Normal);
        assert!(!app.should_quit);
        assert!(app.records.is_empty());
        assert!(app.selected_record().is_none());
    }

    #[test]
    fn selection_follows_path_across_snapshots() {
        let mut app = App::new();
        app.set_snapshot(&snapshot(&["/wt/a", "/wt/b", "/wt/c"]));
        app.select_next();
        assert_eq!(app.selected_record().map(WorktreeRecord::name).as_deref(), Some("b"));

        app.set_snapshot(&snapshot(&["/wt/0", "/wt/a", "/wt/b"]));
        assert_eq!(app.selected, 2);

        app.set_snapshot(&snapshot(&["/wt/0"]));
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn selection_is_clamped() {
        let mut app = App::new();
        app.set_snapshot(&snapshot(&["/wt/a", "/wt/b"]));
        app.select_next();
        app.select_next();
        assert_eq!(app.selected, 1);
        app.select_prev();
        app.select_prev();
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn input_editing_handles_multibyte() {
        let mut app = App::new();
        app.open_prompt(AppMode::RenameInput, Some("/wt/a".into()), "ab");
        app.cursor_left();
        app.insert_char('é');
        assert_eq!(app.input, "aéb");
        app.backspace();
        assert_eq!(app.input, "ab");
        app.cursor_right();
        app.insert_char('c');
        assert_eq!(app.input, "abc");

        let (text, target) = app.close_prompt();
        assert_eq!(text, "abc");
        assert_eq!(target, Some(PathBuf::from("/wt/a")));
        assert_eq!(app.mode, AppMode::Normal);
    }

    #[test]
    fn operation_events_track_in_flight_paths() {
        let mut app = App::new();
        let path = PathBuf::from("/wt/feature1");
        app.handle_core_event(&CoreEvent::OperationStarted {
            path: path.clone(),
            kind: OperationKind::Rename,
        });
        assert!(app.is_busy(&path));
        assert_eq!(app.status, "Renaming feature1...");

        app.handle_core_event(&CoreEvent::OperationSucceeded {
            path: path.clone(),
            kind: OperationKind::Rename,
            record: Some(record("/wt/feature1-renamed")),
        });
        assert!(!app.is_busy(&path));
        assert_eq!(app.status, "Renamed feature1 to feature1-renamed");
    }

    #[test]
    fn rejected_duplicate_keeps_running_marker() {
        let mut app = App::new();
        let path = PathBuf::from("/wt/a");
        app.handle_core_event(&CoreEvent::OperationStarted {
            path: path.clone(),
            kind: OperationKind::Rename,
        });
        app.handle_core_event(&CoreEvent::OperationFailed {
            path: path.clone(),
            kind: OperationKind::Remove,
            error_kind: ErrorKind::AlreadyInProgress,
            message: "operation already in progress".into(),
        });
        assert!(app.is_busy(&path));

        app.handle_core_event(&CoreEvent::OperationFailed {
            path: path.clone(),
            kind: OperationKind::Rename,
            error_kind: ErrorKind::FilesystemMoveFailed,
            message: "permission denied".into(),
        });
        assert!(!app.is_busy(&path));
    }

    #[test]
    fn filter_matches_name_branch_and_path() {
        let mut app = App::new();
        let mut main = WorktreeRecord::new("/repo", BranchRef::Named("trunk".into()));
        main.is_main = true;
        let feature = WorktreeRecord::new("/wt/feature1", BranchRef::Named("feat/login".into()));
        let scratch = WorktreeRecord::new("/wt/scratch", BranchRef::Detached);
        app.set_snapshot(&Snapshot {
            generation: 1,
            records: vec![main, feature, scratch],
        });

        app.set_filter("MAIN");
        assert_eq!(app.records.len(), 1);
        assert!(app.records[0].is_main);

        app.set_filter(" login ");
        assert_eq!(app.records[0].name(), "feature1");
        assert_eq!(app.records.len(), 1);

        app.set_filter("wt");
        assert!(app.records.is_empty());
        app.set_filter("/wt/");
        assert_eq!(app.records.len(), 2);

        app.set_filter("");
        assert_eq!(app.records.len(), 3);
        assert_eq!(app.all.len(), 3);
    }

    #[test]
    fn filter_keeps_selection_on_same_path() {
        let mut app = App::new();
        app.set_snapshot(&snapshot(&["/wt/alpha", "/wt/beta", "/wt/gamma"]));
        app.select_next();
        app.select_next();
        assert_eq!(app.selected_record().unwrap().name(), "gamma");

        app.set_filter("a");
        assert_eq!(app.selected_record().unwrap().name(), "gamma");

        app.set_filter("gam");
        assert_eq!(app.selected, 0);
        app.set_snapshot(&snapshot(&["/wt/0", "/wt/alpha", "/wt/gamma"]));
        assert_eq!(app.records.len(), 1);
        assert_eq!(app.selected_record().unwrap().name(), "gamma");

        app.set_filter("zzz");
        assert!(app.selected_record().is_none());
        app.jump();
        assert!(!app.should_quit);
    }

    #[test]
    fn jump_records_selected_path() {
        let mut app = App::new();
        app.set_snapshot(&snapshot(&["/wt/a", "/wt/b"]));
        app.select_next();
        app.jump();
        assert!(app.should_quit);
        assert_eq!(app.selection, Some(PathBuf::from("/wt/b")));
    }

    #[test]
    fn manual_repair_is_called_out() {
        let mut app = App::new();
        app.handle_core_event(&CoreEvent::OperationFailed {
            path: PathBuf::from("/wt/a"),
            kind: OperationKind::Rename,
            error_kind: ErrorKind::ManualRepairRequired,
            message: "move back failed".into(),
        });
        assert!(app.status.starts_with("MANUAL REPAIR REQUIRED"));
    }

    #[test]
    fn stale_flag_clears_on_next_reconcile() {
        let mut app = App::new();
        app.handle_core_event(&CoreEvent::ReconciliationStale {
            message: "timed out".into(),
        });
        assert!(app.stale);
        app.handle_core_event(&CoreEvent::Reconciled {
            adds: Vec::new(),
            updates: Vec::new(),
            removes: Vec::new(),
        });
        assert!(!app.stale);
        assert_eq!(app.status, "Ready");
    }
}
