//! Arbor Core Library
//!
//! Keeps an in-memory model of a repository's git worktrees in step with git
//! and runs guarded mutating operations against it:
//! - Worktree registry with per-path locks and reservations
//! - Reconciliation from `git worktree list` / `git status`
//! - Add, remove and rename with rollback on partial failure
//! - Configuration resolution, tracing setup, git dir watching

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod fs;
pub mod reconciler;
pub mod registry;
pub mod runner;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tracing_init;
pub mod watch;
pub mod worktree;

pub use config::Config;
pub use controller::{AddRequest, CancelOutcome, RemoveRequest, RenameRequest};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::{CoreEvent, OperationKind};
pub use registry::Snapshot;
pub use worktree::{BranchRef, SortOrder, StatusSummary, WorktreeRecord};
