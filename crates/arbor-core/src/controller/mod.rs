//! Mutating worktree operations.
//!
//! Every operation first takes the registry lock on the worktree it touches
//! (or a reservation on the path it creates). A second operation on the same
//! path fails fast with [`Error::AlreadyInProgress`] and no side effects.
//! Each operation publishes `OperationStarted` once it holds its lock, then
//! exactly one of `OperationSucceeded` / `OperationFailed`.

mod rename;
pub mod validate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus, OperationKind};
use crate::fs::DirMover;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::runner::{CommandResult, CommandRunner, args, describe};
use crate::worktree::WorktreeRecord;

pub use rename::{RenameState, RenameTrace};

/// Explicit inputs of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Fallback directory for git commands when the main worktree is unknown.
    pub repo_dir: PathBuf,
    pub command_timeout: Duration,
    /// Rename the checked-out branch along with the directory.
    pub rename_branch: bool,
}

/// Create a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub branch: String,
    pub target_path: PathBuf,
    /// Create `branch` (from `base_ref`, or HEAD) instead of checking it out.
    pub create_branch: bool,
    pub base_ref: Option<String>,
}

/// Delete a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveRequest {
    pub path: PathBuf,
    pub force: bool,
}

/// Give a worktree directory a new final path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub path: PathBuf,
    pub new_name: String,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A draft was discarded; nothing had been touched.
    Cancelled,
    /// No rename was pending for that path.
    NothingPending,
    /// The rename was already confirmed and is running.
    TooLate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Draft {
    Pending,
    Confirmed,
}

/// Runs add, remove and rename against git and the filesystem.
pub struct Controller {
    runner: Arc<dyn CommandRunner>,
    mover: Arc<dyn DirMover>,
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
    events: EventBus,
    config: ControllerConfig,
    drafts: Mutex<HashMap<PathBuf, Draft>>,
}

impl Controller {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mover: Arc<dyn DirMover>,
        reconciler: Arc<Reconciler>,
        events: EventBus,
        config: ControllerConfig,
    ) -> Self {
        Self {
            runner,
            mover,
            registry: Arc::clone(reconciler.registry()),
            reconciler,
            events,
            config,
            drafts: Mutex::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Create a worktree and reconcile its path.
    ///
    /// Returns the new record, or `None` when the worktree was created but
    /// the follow-up reconciliation could not list it.
    pub async fn add(&self, request: AddRequest) -> Result<Option<WorktreeRecord>> {
        let target = validate::normalize_target(&request.target_path, &self.config.repo_dir);
        let result = self.add_inner(&request, &target).await;
        match &result {
            Ok(record) => self.succeeded(&target, OperationKind::Add, record.clone()),
            Err(e) => self.failed(&target, OperationKind::Add, e),
        }
        result
    }

    async fn add_inner(
        &self,
        request: &AddRequest,
        target: &Path,
    ) -> Result<Option<WorktreeRecord>> {
        validate::validate_branch(&request.branch)?;
        if let Some(base) = &request.base_ref
            && (base.is_empty() || base.starts_with('-'))
        {
            return Err(Error::ValidationFailed(format!("invalid base ref: {base}")));
        }
        if std::fs::symlink_metadata(target).is_ok() {
            return Err(Error::ValidationFailed(format!(
                "{} already exists",
                target.display()
            )));
        }

        let reservation = self.registry.reserve(target)?;
        self.started(target, OperationKind::Add);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target_arg = target.to_string_lossy().into_owned();
        let mut git_args = args(["worktree", "add"]);
        if request.create_branch {
            git_args.extend(args(["-b", request.branch.as_str(), target_arg.as_str()]));
            git_args.extend(request.base_ref.iter().cloned());
        } else {
            git_args.extend(args([target_arg.as_str(), request.branch.as_str()]));
        }
        self.git(&git_args, &self.main_dir()).await?;

        drop(reservation);
        Ok(self.settle(target).await)
    }

    /// Remove a worktree through git. The main worktree is refused.
    pub async fn remove(&self, request: RemoveRequest) -> Result<()> {
        let result = self.remove_inner(&request).await;
        match &result {
            Ok(()) => self.succeeded(&request.path, OperationKind::Remove, None),
            Err(e) => self.failed(&request.path, OperationKind::Remove, e),
        }
        result
    }

    async fn remove_inner(&self, request: &RemoveRequest) -> Result<()> {
        if self
            .registry
            .get(&request.path)
            .is_some_and(|record| record.is_main)
        {
            return Err(Error::ValidationFailed(
                "the main worktree cannot be removed".into(),
            ));
        }

        let lock = self.registry.try_lock(&request.path)?;
        self.started(&request.path, OperationKind::Remove);

        let path_arg = request.path.to_string_lossy().into_owned();
        let mut git_args = args(["worktree", "remove"]);
        if request.force {
            git_args.push("--force".into());
        }
        git_args.push(path_arg);
        self.git(&git_args, &self.main_dir()).await?;

        drop(lock);
        self.settle(&request.path).await;
        Ok(())
    }

    /// Open a rename draft. Takes no lock and touches nothing.
    pub fn begin_rename(&self, path: &Path) {
        self.drafts()
            .entry(path.to_path_buf())
            .or_insert(Draft::Pending);
        debug!(path = %path.display(), "rename draft opened");
    }

    /// Discard a rename draft. A confirmed rename cannot be cancelled.
    pub fn cancel(&self, path: &Path) -> CancelOutcome {
        let mut drafts = self.drafts();
        match drafts.get(path) {
            Some(Draft::Pending) => {
                drafts.remove(path);
                debug!(path = %path.display(), "rename draft cancelled");
                CancelOutcome::Cancelled
            }
            Some(Draft::Confirmed) => CancelOutcome::TooLate,
            None => CancelOutcome::NothingPending,
        }
    }

    fn drafts(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Draft>> {
        self.drafts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory git commands run from: the main worktree when known.
    fn main_dir(&self) -> PathBuf {
        self.registry
            .snapshot()
            .iter()
            .find(|record| record.is_main)
            .map_or_else(|| self.config.repo_dir.clone(), |record| record.path.clone())
    }

    async fn git(&self, git_args: &[String], cwd: &Path) -> Result<CommandResult> {
        let command = describe("git", git_args);
        let start = Instant::now();
        let result = self
            .runner
            .run(git_args, cwd, self.config.command_timeout)
            .await?
            .check(&command);
        debug!(
            command = %command,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis(),
            "controller git step"
        );
        result
    }

    /// Targeted reconciliation after a successful operation.
    async fn settle(&self, path: &Path) -> Option<WorktreeRecord> {
        if let Err(e) = self.reconciler.reconcile_path(path).await {
            warn!(path = %path.display(), error = %e, "follow-up reconciliation failed");
        }
        self.registry.get(path)
    }

    fn started(&self, path: &Path, kind: OperationKind) {
        info!(path = %path.display(), %kind, "operation started");
        self.events.emit(CoreEvent::OperationStarted {
            path: path.to_path_buf(),
            kind,
        });
    }

    fn succeeded(&self, path: &Path, kind: OperationKind, record: Option<WorktreeRecord>) {
        info!(path = %path.display(), %kind, "operation succeeded");
        self.events.emit(CoreEvent::OperationSucceeded {
            path: path.to_path_buf(),
            kind,
            record,
        });
    }

    fn failed(&self, path: &Path, kind: OperationKind, error: &Error) {
        if error.requires_manual_repair() {
            tracing::error!(path = %path.display(), %kind, error = %error, "operation needs manual repair");
        } else {
            warn!(path = %path.display(), %kind, error = %error, "operation failed");
        }
        self.events.emit(CoreEvent::OperationFailed {
            path: path.to_path_buf(),
            kind,
            error_kind: error.kind(),
            message: error.to_string(),
        });
    }
}
