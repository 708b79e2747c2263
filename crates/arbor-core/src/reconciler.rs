//! Reconciliation: rebuild the registry from what git reports.
//!
//! A pass makes one listing call and one status call per listed worktree.
//! Status calls run concurrently under a semaphore. Passes are serialized:
//! [`Reconciler::reconcile`] waits for an in-flight pass, while
//! [`Reconciler::try_reconcile`] does not start a second one. A request
//! that finds a pass running is remembered, and one more full pass runs as
//! soon as the running one ends.
//!
//! A failed listing never touches the registry; it is reported as
//! [`Error::ReconciliationStale`] and an advisory event. A failed status
//! call keeps the record's previous dirty state and attaches a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventBus};
use crate::registry::{Diff, Registry};
use crate::runner::{CommandRunner, args};
use crate::worktree::{
    ListedWorktree, StatusSummary, WorktreeRecord, parse_status_v2, parse_worktree_list,
};

const LIST_ARGS: [&str; 3] = ["worktree", "list", "--porcelain"];
const STATUS_ARGS: [&str; 3] = ["status", "--porcelain=v2", "--branch"];

/// Process-wide facts the reconciler needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Any directory inside the repository; git commands run here.
    pub repo_dir: PathBuf,
    /// The tool's own working directory, used to mark the active worktree.
    pub current_dir: PathBuf,
    pub command_timeout: Duration,
    pub status_concurrency: usize,
}

/// Keeps the registry in step with git.
pub struct Reconciler {
    runner: Arc<dyn CommandRunner>,
    registry: Arc<Registry>,
    events: EventBus,
    config: ReconcilerConfig,
    pass: Mutex<()>,
    /// A full pass was requested while another pass held `pass`.
    rerun: AtomicBool,
    status_limit: Arc<Semaphore>,
}

impl Reconciler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        registry: Arc<Registry>,
        events: EventBus,
        config: ReconcilerConfig,
    ) -> Self {
        let status_limit = Arc::new(Semaphore::new(config.status_concurrency.max(1)));
        Self {
            runner,
            registry,
            events,
            config,
            pass: Mutex::new(()),
            rerun: AtomicBool::new(false),
            status_limit,
        }
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run a full pass, waiting for any pass already in flight.
    pub async fn reconcile(&self) -> Result<Diff> {
        let pass = self.pass.lock().await;
        // This pass covers any request queued before it started.
        self.rerun.store(false, Ordering::SeqCst);
        let result = self.run_pass(None).await;
        drop(pass);
        self.run_queued().await;
        result
    }

    /// Run a full pass unless one is already in flight.
    ///
    /// Returns `None` when a pass is running; the request is then queued
    /// and the caller that holds the pass runs one more after it.
    pub async fn try_reconcile(&self) -> Option<Result<Diff>> {
        self.rerun.store(true, Ordering::SeqCst);
        self.run_queued().await
    }

    /// Reconcile a single path: add, update or remove just that record.
    pub async fn reconcile_path(&self, path: &Path) -> Result<Diff> {
        let pass = self.pass.lock().await;
        let result = self.run_pass(Some(path)).await;
        drop(pass);
        self.run_queued().await;
        result
    }

    /// Run full passes while one is queued and no other caller holds the
    /// pass. The flag is re-checked after the lock is released so a request
    /// that lost the race for the lock is not dropped.
    async fn run_queued(&self) -> Option<Result<Diff>> {
        let mut last = None;
        while self.rerun.load(Ordering::SeqCst) {
            let Ok(pass) = self.pass.try_lock() else {
                debug!("reconciliation in flight, queued a follow-up pass");
                break;
            };
            while self.rerun.swap(false, Ordering::SeqCst) {
                last = Some(self.run_pass(None).await);
            }
            drop(pass);
        }
        last
    }

    /// Run git's worktree listing. The first entry is the main worktree.
    pub async fn list_worktrees(&self) -> Result<Vec<ListedWorktree>> {
        let result = self
            .runner
            .run(&args(LIST_ARGS), &self.config.repo_dir, self.config.command_timeout)
            .await?
            .check("git worktree list --porcelain")?;
        Ok(parse_worktree_list(&result.stdout))
    }

    async fn run_pass(&self, scope: Option<&Path>) -> Result<Diff> {
        let start = Instant::now();
        let listed = match self.list_worktrees().await {
            Ok(listed) => listed,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "worktree listing failed, keeping last snapshot");
                self.events.emit(CoreEvent::ReconciliationStale {
                    message: message.clone(),
                });
                return Err(Error::ReconciliationStale(message));
            }
        };

        let previous = self.registry.snapshot();
        let active = active_worktree(&listed, &self.config.current_dir);
        let in_scope: Vec<(usize, ListedWorktree)> = listed
            .into_iter()
            .enumerate()
            .filter(|(_, wt)| scope.is_none_or(|s| s == wt.path))
            .collect();

        let status_targets: Vec<PathBuf> = in_scope
            .iter()
            .filter(|(_, wt)| !wt.is_bare && !wt.prunable)
            .map(|(_, wt)| wt.path.clone())
            .collect();
        let mut statuses = self.collect_status(status_targets).await;

        let mut candidates = Vec::with_capacity(in_scope.len());
        for (index, wt) in in_scope {
            let mut record = WorktreeRecord {
                head: wt.head,
                is_main: index == 0,
                is_bare: wt.is_bare,
                is_active: active.as_deref() == Some(wt.path.as_path()),
                ..WorktreeRecord::new(wt.path, wt.branch)
            };
            let outcome = if wt.is_bare {
                Ok(StatusSummary::default())
            } else if wt.prunable {
                Err("worktree directory is missing (prunable)".to_string())
            } else {
                statuses
                    .remove(&record.path)
                    .unwrap_or_else(|| Err("status check did not complete".to_string()))
            };
            match outcome {
                Ok(status) => {
                    record.status = status;
                    record.is_dirty = status.is_dirty();
                }
                Err(message) => {
                    if let Some(old) = previous.get(&record.path) {
                        record.status = old.status;
                        record.is_dirty = old.is_dirty;
                    }
                    warn!(path = %record.path.display(), error = %message, "status check failed");
                    self.events.emit(CoreEvent::RecordWarning {
                        path: record.path.clone(),
                        message: message.clone(),
                    });
                    record.warning = Some(message);
                }
            }
            candidates.push(record);
        }

        let diff = self.registry.diff_against(candidates, scope);
        let applied = self.registry.apply_diff(diff);
        info!(
            scope = ?scope,
            adds = applied.adds.len(),
            updates = applied.updates.len(),
            removes = applied.removes.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "reconciliation pass complete"
        );
        if !applied.is_empty() {
            self.events.emit(applied.clone().into());
        }
        Ok(applied)
    }

    async fn collect_status(
        &self,
        targets: Vec<PathBuf>,
    ) -> HashMap<PathBuf, std::result::Result<StatusSummary, String>> {
        let mut set = JoinSet::new();
        for path in targets {
            let runner = Arc::clone(&self.runner);
            let limit = Arc::clone(&self.status_limit);
            let timeout = self.config.command_timeout;
            set.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let outcome = status_of(runner.as_ref(), &path, timeout).await;
                (path, outcome)
            });
        }

        let mut statuses = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, outcome)) => {
                    statuses.insert(path, outcome);
                }
                Err(e) => warn!(error = %e, "status task aborted"),
            }
        }
        statuses
    }
}

async fn status_of(
    runner: &dyn CommandRunner,
    path: &Path,
    timeout: Duration,
) -> std::result::Result<StatusSummary, String> {
    match runner.run(&args(STATUS_ARGS), path, timeout).await {
        Ok(result) if result.success() => Ok(parse_status_v2(&result.stdout)),
        Ok(result) => Err(format!(
            "git status exited with code {}: {}",
            result.exit_code,
            result.stderr.trim()
        )),
        Err(e) => Err(e.to_string()),
    }
}

/// The deepest listed worktree containing `current_dir`.
fn active_worktree(listed: &[ListedWorktree], current_dir: &Path) -> Option<PathBuf> {
    listed
        .iter()
        .filter(|wt| current_dir.starts_with(&wt.path))
        .max_by_key(|wt| wt.path.components().count())
        .map(|wt| wt.path.clone())
}
