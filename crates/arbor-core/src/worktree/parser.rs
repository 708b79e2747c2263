//! Parsers for git's porcelain output.

use std::path::PathBuf;

use super::record::{BranchRef, StatusSummary};

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub head: String,
    pub branch: BranchRef,
    pub is_bare: bool,
    /// git reports the administrative entry as prunable (directory missing).
    pub prunable: bool,
}

impl ListedWorktree {
    fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            head: String::new(),
            branch: BranchRef::Detached,
            is_bare: false,
            prunable: false,
        }
    }
}

/// Parse `git worktree list --porcelain`.
///
/// Entries are separated by blank lines and start with a `worktree <path>`
/// line. The first entry is the main worktree.
///
/// ```text
/// worktree /home/user/repo
/// HEAD abc123def456
/// branch refs/heads/main
///
/// worktree /home/user/repo-worktrees/feature1
/// HEAD def789abc012
/// detached
/// ```
pub fn parse_worktree_list(output: &str) -> Vec<ListedWorktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<ListedWorktree> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            worktrees.extend(current.take());
            current = Some(ListedWorktree::new(path));
            continue;
        }
        let Some(wt) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            wt.head = head.to_string();
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let name = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            wt.branch = BranchRef::Named(name.to_string());
        } else if line == "detached" {
            wt.branch = BranchRef::Detached;
        } else if line == "bare" {
            wt.is_bare = true;
        } else if line == "prunable" || line.starts_with("prunable ") {
            wt.prunable = true;
        }
    }
    worktrees.extend(current);
    worktrees
}

/// Parse `git status --porcelain=v2 --branch` into counts.
pub fn parse_status_v2(output: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in output.lines() {
        if let Some(ab) = line.strip_prefix("# branch.ab ") {
            let mut parts = ab.split_whitespace();
            summary.ahead = parts
                .next()
                .and_then(|a| a.trim_start_matches('+').parse().ok())
                .unwrap_or(0);
            summary.behind = parts
                .next()
                .and_then(|b| b.trim_start_matches('-').parse().ok())
                .unwrap_or(0);
        } else if line.starts_with("? ") {
            summary.untracked += 1;
        } else if line.starts_with("1 ") || line.starts_with("2 ") || line.starts_with("u ") {
            let xy = line.split_whitespace().nth(1).unwrap_or("..");
            let mut chars = xy.chars();
            if chars.next().is_some_and(|c| c != '.') {
                summary.staged += 1;
            }
            if chars.next().is_some_and(|c| c != '.') {
                summary.modified += 1;
            }
        }
    }
    summary
}
