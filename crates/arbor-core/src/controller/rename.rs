//! Rename as an explicit state machine.
//!
//! ```text
//! Idle -> Validating -> Moving -> Repairing -> Committed
//!            |            |          |
//!            v            v          v
//!           Idle         Idle    RollingBack -> Idle
//!                                      |
//!                                      v
//!                              ManualRepairRequired
//! ```
//!
//! The record's path only changes in `Committed`, after both the move and
//! git's metadata repair went through.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::validate::{sibling_path, validate_branch, validate_new_name};
use super::{Controller, Draft, RenameRequest};
use crate::error::{Error, InconsistentKind, Result};
use crate::events::OperationKind;
use crate::fs::is_cross_device;
use crate::registry::{PathLock, Reservation};
use crate::runner::args;
use crate::worktree::{BranchRef, WorktreeRecord};

/// States of a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameState {
    Idle,
    Validating,
    Moving,
    Repairing,
    RollingBack,
    Committed,
    ManualRepairRequired,
}

impl RenameState {
    /// Whether `next` is a legal successor of `self`.
    pub const fn can_enter(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Validating)
                | (Self::Validating | Self::Moving | Self::RollingBack, Self::Idle)
                | (Self::Validating, Self::Moving)
                | (Self::Moving, Self::Repairing)
                | (Self::Repairing, Self::Committed | Self::RollingBack)
                | (Self::RollingBack, Self::ManualRepairRequired)
        )
    }
}

/// Every state a rename passed through, starting at `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTrace {
    path: PathBuf,
    states: Vec<RenameState>,
}

impl RenameTrace {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            states: vec![RenameState::Idle],
        }
    }

    pub fn states(&self) -> &[RenameState] {
        &self.states
    }

    pub fn current(&self) -> RenameState {
        self.states.last().copied().unwrap_or(RenameState::Idle)
    }

    fn enter(&mut self, next: RenameState) {
        let from = self.current();
        debug_assert!(from.can_enter(next), "illegal rename transition {from:?} -> {next:?}");
        debug!(path = %self.path.display(), ?from, to = ?next, "rename transition");
        self.states.push(next);
    }
}

/// Marks a path's rename as confirmed while the lock on it is held.
/// Dropping it clears the draft.
struct ConfirmedDraft<'a> {
    controller: &'a Controller,
    path: PathBuf,
}

impl<'a> ConfirmedDraft<'a> {
    fn mark(controller: &'a Controller, path: &Path) -> Self {
        controller.drafts().insert(path.to_path_buf(), Draft::Confirmed);
        Self {
            controller,
            path: path.to_path_buf(),
        }
    }
}

impl Drop for ConfirmedDraft<'_> {
    fn drop(&mut self) {
        self.controller.drafts().remove(&self.path);
    }
}

/// Locks held for the duration of a rename. The draft is declared first so
/// it is cleared before the path lock is released.
struct Held<'a> {
    draft: ConfirmedDraft<'a>,
    lock: PathLock,
    _reservation: Reservation,
    record: WorktreeRecord,
    new_path: PathBuf,
}

impl Controller {
    /// Rename a worktree directory (and, when configured, its branch).
    pub async fn rename(&self, request: RenameRequest) -> Result<WorktreeRecord> {
        self.rename_traced(request).await.0
    }

    /// Like [`Controller::rename`], also returning the transition trace.
    pub async fn rename_traced(
        &self,
        request: RenameRequest,
    ) -> (Result<WorktreeRecord>, RenameTrace) {
        let mut trace = RenameTrace::new(&request.path);
        let result = self.run_rename(&request, &mut trace).await;
        match &result {
            Ok(record) => self.succeeded(&request.path, OperationKind::Rename, Some(record.clone())),
            Err(e) => self.failed(&request.path, OperationKind::Rename, e),
        }
        (result, trace)
    }

    async fn run_rename(
        &self,
        request: &RenameRequest,
        trace: &mut RenameTrace,
    ) -> Result<WorktreeRecord> {
        trace.enter(RenameState::Validating);
        let held = match self.validate_rename(request) {
            Ok(held) => held,
            Err(e) => {
                trace.enter(RenameState::Idle);
                return Err(e);
            }
        };
        self.started(&request.path, OperationKind::Rename);
        let old_path = request.path.as_path();
        let new_path = held.new_path.clone();

        trace.enter(RenameState::Moving);
        if let Err(source) = self.mover.move_dir(old_path, &new_path).await {
            trace.enter(RenameState::Idle);
            return Err(Error::FilesystemMoveFailed {
                from: old_path.to_path_buf(),
                to: new_path,
                cross_device: is_cross_device(&source),
                source,
            });
        }

        trace.enter(RenameState::Repairing);
        let main_dir = self.main_dir();
        let repair = self.git(&repair_args(&new_path), &main_dir).await;
        let branch_step = match (&repair, held.record.branch.name()) {
            (Ok(_), Some(old_branch)) if self.wants_branch_rename(old_branch, &request.new_name) => {
                Some(
                    self.git(
                        &args(["branch", "-m", old_branch, request.new_name.as_str()]),
                        &main_dir,
                    )
                    .await,
                )
            }
            _ => None,
        };

        let failure = match (repair, branch_step) {
            (Err(e), _) => Some((e, false)),
            (Ok(_), Some(Err(e))) => Some((e, true)),
            _ => None,
        };
        if let Some((cause, repaired)) = failure {
            trace.enter(RenameState::RollingBack);
            let kind = self.roll_back(old_path, &new_path, repaired, &main_dir).await;
            trace.enter(match kind {
                InconsistentKind::RolledBack => RenameState::Idle,
                InconsistentKind::ManualRepairRequired => RenameState::ManualRepairRequired,
            });
            drop(held);
            if let Err(e) = self.reconciler.reconcile().await {
                debug!(error = %e, "reconciliation after rollback failed");
            }
            return Err(Error::RenameInconsistent {
                kind,
                path: old_path.to_path_buf(),
                new_path,
                message: cause.to_string(),
            });
        }

        let new_branch = held
            .record
            .branch
            .name()
            .filter(|old| self.wants_branch_rename(old, &request.new_name))
            .map(|_| BranchRef::Named(request.new_name.clone()));
        let Held {
            draft,
            mut lock,
            _reservation: reservation,
            record,
            ..
        } = held;
        let committed = self
            .registry
            .commit_rename(&mut lock, &new_path, new_branch)
            .unwrap_or(record);
        trace.enter(RenameState::Committed);
        drop(reservation);
        drop(draft);
        drop(lock);
        info!(from = %old_path.display(), to = %new_path.display(), "rename committed");

        Ok(self.settle(&new_path).await.unwrap_or(committed))
    }

    /// Lock the source, check the new name and reserve the destination.
    fn validate_rename(&self, request: &RenameRequest) -> Result<Held<'_>> {
        validate_new_name(&request.new_name)?;
        let record = self.registry.get(&request.path).ok_or_else(|| {
            Error::ValidationFailed(format!("no worktree at {}", request.path.display()))
        })?;
        if record.is_main {
            return Err(Error::ValidationFailed(
                "the main worktree cannot be renamed".into(),
            ));
        }

        let lock = self.registry.try_lock(&request.path)?;
        let draft = ConfirmedDraft::mark(self, &request.path);
        let new_path = sibling_path(&request.path, &request.new_name)?;
        if new_path == request.path {
            return Err(Error::ValidationFailed(
                "new name is the same as the current one".into(),
            ));
        }
        if std::fs::symlink_metadata(&new_path).is_ok() {
            return Err(Error::ValidationFailed(format!(
                "{} already exists",
                new_path.display()
            )));
        }
        let reservation = self.registry.reserve(&new_path)?;

        Ok(Held {
            draft,
            lock,
            _reservation: reservation,
            record,
            new_path,
        })
    }

    fn wants_branch_rename(&self, old_branch: &str, new_name: &str) -> bool {
        self.config.rename_branch && old_branch != new_name && validate_branch(new_name).is_ok()
    }

    /// Move the directory back and, if git had already been pointed at the
    /// new location, point it back too.
    async fn roll_back(
        &self,
        old_path: &Path,
        new_path: &Path,
        repaired: bool,
        main_dir: &Path,
    ) -> InconsistentKind {
        if let Err(e) = self.mover.move_dir(new_path, old_path).await {
            tracing::error!(
                from = %new_path.display(),
                to = %old_path.display(),
                error = %e,
                "rollback move failed"
            );
            return InconsistentKind::ManualRepairRequired;
        }
        if repaired
            && let Err(e) = self.git(&repair_args(old_path), main_dir).await
        {
            tracing::error!(path = %old_path.display(), error = %e, "rollback repair failed");
            return InconsistentKind::ManualRepairRequired;
        }
        info!(path = %old_path.display(), "rename rolled back");
        InconsistentKind::RolledBack
    }
}

fn repair_args(path: &Path) -> Vec<String> {
    let path = path.to_string_lossy();
    args(["worktree", "repair", path.as_ref()])
}
