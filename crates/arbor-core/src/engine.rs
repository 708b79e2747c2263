//! The boundary between the core and a front end.
//!
//! Requests are spawned as tokio tasks so the caller's event loop never
//! waits on git or the filesystem. Outcomes arrive as [`CoreEvent`]s; the
//! returned handles are there for callers (headless commands, tests) that
//! do want to await a result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::controller::validate::sanitize_for_path;
use crate::controller::{
    AddRequest, CancelOutcome, Controller, ControllerConfig, RemoveRequest, RenameRequest,
};
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::fs::{DirMover, TokioDirMover};
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::registry::{Diff, Registry, Snapshot};
use crate::runner::{CommandRunner, ProcessRunner};
use crate::watch::{GIT_WATCH_DEBOUNCE, GitDirWatcher, resolve_common_dir, spawn_git_dir_watcher};
use crate::worktree::{SortOrder, WorktreeRecord};

/// Everything the engine needs, resolved up front.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub repo_dir: PathBuf,
    pub current_dir: PathBuf,
    pub command_timeout: Duration,
    pub status_concurrency: usize,
    pub rename_branch: bool,
    pub sort_order: SortOrder,
}

impl EngineConfig {
    pub fn from_config(config: &Config, repo_dir: PathBuf, current_dir: PathBuf) -> Self {
        Self {
            repo_dir,
            current_dir,
            command_timeout: config.command_timeout(),
            status_concurrency: config.status_concurrency(),
            rename_branch: config.worktrees.rename_branch,
            sort_order: config.sort_order(),
        }
    }
}

/// Facade over the registry, reconciler and controller.
pub struct Engine {
    runner: Arc<dyn CommandRunner>,
    registry: Arc<Registry>,
    reconciler: Arc<Reconciler>,
    controller: Arc<Controller>,
    events: EventBus,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mover: Arc<dyn DirMover>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.sort_order));
        let events = EventBus::default();
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&runner),
            Arc::clone(&registry),
            events.clone(),
            ReconcilerConfig {
                repo_dir: config.repo_dir.clone(),
                current_dir: config.current_dir.clone(),
                command_timeout: config.command_timeout,
                status_concurrency: config.status_concurrency,
            },
        ));
        let controller = Arc::new(Controller::new(
            Arc::clone(&runner),
            mover,
            Arc::clone(&reconciler),
            events.clone(),
            ControllerConfig {
                repo_dir: config.repo_dir.clone(),
                command_timeout: config.command_timeout,
                rename_branch: config.rename_branch,
            },
        ));
        Self {
            runner,
            registry,
            reconciler,
            controller,
            events,
            config,
        }
    }

    /// Production wiring: real git, real filesystem, the process's cwd.
    pub fn from_config(config: &Config, repo_dir: &Path) -> Result<Self> {
        let repo_dir = std::fs::canonicalize(repo_dir)?;
        let current_dir = std::env::current_dir()
            .and_then(std::fs::canonicalize)
            .unwrap_or_else(|_| repo_dir.clone());
        let engine_config = EngineConfig::from_config(config, repo_dir, current_dir);
        Ok(Self::new(
            Arc::new(ProcessRunner::new(config.git.binary.clone())),
            Arc::new(TokioDirMover),
            engine_config,
        ))
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.registry.order()
    }

    pub fn set_sort_order(&self, order: SortOrder) {
        self.registry.set_order(order);
    }

    /// Run a full reconciliation and wait for it.
    pub async fn reconcile(&self) -> Result<Diff> {
        self.reconciler.reconcile().await
    }

    /// Request a full reconciliation in the background.
    pub fn refresh(&self) -> JoinHandle<Result<Diff>> {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move { reconciler.reconcile().await })
    }

    pub fn request_add(&self, request: AddRequest) -> JoinHandle<Result<Option<WorktreeRecord>>> {
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move { controller.add(request).await })
    }

    pub fn request_remove(&self, request: RemoveRequest) -> JoinHandle<Result<()>> {
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move { controller.remove(request).await })
    }

    pub fn request_rename(&self, request: RenameRequest) -> JoinHandle<Result<WorktreeRecord>> {
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move { controller.rename(request).await })
    }

    pub fn begin_rename(&self, path: &Path) {
        self.controller.begin_rename(path);
    }

    pub fn request_cancel(&self, path: &Path) -> CancelOutcome {
        self.controller.cancel(path)
    }

    /// Default location for a new worktree of `branch`:
    /// `<base_dir>/<repo-name>/<branch>`.
    pub fn default_target(&self, base_dir: &Path, branch: &str) -> PathBuf {
        let snapshot = self.registry.snapshot();
        let repo_name = snapshot
            .iter()
            .find(|record| record.is_main)
            .map_or_else(
                || {
                    self.config
                        .repo_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "repo".to_string())
                },
                WorktreeRecord::name,
            );
        base_dir.join(repo_name).join(sanitize_for_path(branch))
    }

    /// Reconcile every `interval` until `cancel` fires. A tick that finds a
    /// pass running is folded into one follow-up pass.
    pub fn spawn_auto_refresh(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "auto refresh started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(Err(e)) = reconciler.try_reconcile().await {
                            debug!(error = %e, "periodic refresh failed");
                        }
                    }
                }
            }
            debug!("auto refresh stopped");
        })
    }

    /// Watch the repository's git directory and refresh on changes.
    pub async fn watch_git_dir(&self, cancel: CancellationToken) -> Result<GitDirWatcher> {
        let common_dir = resolve_common_dir(
            self.runner.as_ref(),
            &self.config.repo_dir,
            self.config.command_timeout,
        )
        .await?;
        spawn_git_dir_watcher(
            &common_dir,
            Arc::clone(&self.reconciler),
            GIT_WATCH_DEBOUNCE,
            cancel,
        )
    }
}
