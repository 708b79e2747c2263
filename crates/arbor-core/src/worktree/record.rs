//! Worktree record and ordering.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a worktree has checked out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum BranchRef {
    Named(String),
    Detached,
}

impl BranchRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Detached => None,
        }
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Detached => f.write_str("(detached)"),
        }
    }
}

/// Counts parsed from `git status --porcelain=v2 --branch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub ahead: u32,
    pub behind: u32,
    pub staged: u32,
    pub modified: u32,
    pub untracked: u32,
}

impl StatusSummary {
    pub const fn is_dirty(&self) -> bool {
        self.staged + self.modified + self.untracked > 0
    }
}

/// One git worktree as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeRecord {
    /// Canonical absolute path; the registry key.
    pub path: PathBuf,
    pub branch: BranchRef,
    /// Commit id reported by the listing (empty for bare entries).
    pub head: String,
    /// First entry of git's listing.
    pub is_main: bool,
    pub is_bare: bool,
    pub is_dirty: bool,
    pub status: StatusSummary,
    /// Contains the tool's working directory.
    pub is_active: bool,
    /// Held by an in-flight operation.
    pub locked: bool,
    /// Non-fatal problem from the last reconciliation pass.
    pub warning: Option<String>,
}

impl WorktreeRecord {
    pub fn new(path: impl Into<PathBuf>, branch: BranchRef) -> Self {
        Self {
            path: path.into(),
            branch,
            head: String::new(),
            is_main: false,
            is_bare: false,
            is_dirty: false,
            status: StatusSummary::default(),
            is_active: false,
            locked: false,
            warning: None,
        }
    }

    /// Final path segment, shown as the worktree name.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Whether the fields a reconciliation pass derives differ from `other`.
    ///
    /// `locked` is owned by the controller and ignored here.
    pub fn derived_differs(&self, other: &Self) -> bool {
        self.branch != other.branch
            || self.head != other.head
            || self.is_main != other.is_main
            || self.is_bare != other.is_bare
            || self.is_dirty != other.is_dirty
            || self.status != other.status
            || self.is_active != other.is_active
            || self.warning != other.warning
    }
}

/// Snapshot ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// By path, deterministic.
    #[default]
    Path,
    /// Active worktree first, then the main worktree, then by path.
    ActiveFirst,
}

impl SortOrder {
    pub fn compare(self, a: &WorktreeRecord, b: &WorktreeRecord) -> Ordering {
        match self {
            Self::Path => a.path.cmp(&b.path),
            Self::ActiveFirst => b
                .is_active
                .cmp(&a.is_active)
                .then_with(|| b.is_main.cmp(&a.is_main))
                .then_with(|| a.path.cmp(&b.path)),
        }
    }

    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Path => Self::ActiveFirst,
            Self::ActiveFirst => Self::Path,
        }
    }
}
