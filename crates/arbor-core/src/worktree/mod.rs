//! Worktree data model and git output parsing.

pub mod parser;
mod record;

pub use parser::{ListedWorktree, parse_status_v2, parse_worktree_list};
pub use record::{BranchRef, SortOrder, StatusSummary, WorktreeRecord};
