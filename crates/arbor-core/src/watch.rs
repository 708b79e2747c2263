//! Git directory watcher.
//!
//! Watches `refs/`, `logs/` and `worktrees/` under the repository's common
//! git directory and turns bursts of filesystem events into one refresh
//! request per quiet period.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::runner::{CommandRunner, args};

/// Quiet period before a burst of events becomes a refresh.
pub const GIT_WATCH_DEBOUNCE: Duration = Duration::from_millis(600);

const WATCHED_SUBDIRS: [&str; 3] = ["refs", "logs", "worktrees"];

/// Ask git for the common directory shared by every worktree.
pub async fn resolve_common_dir(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf> {
    let result = runner
        .run(&args(["rev-parse", "--git-common-dir"]), repo_dir, timeout)
        .await?
        .check("git rev-parse --git-common-dir")?;
    let raw = PathBuf::from(result.stdout.trim());
    if raw.as_os_str().is_empty() {
        return Err(Error::Config("git reported an empty common dir".into()));
    }
    let common = if raw.is_absolute() {
        raw
    } else {
        repo_dir.join(raw)
    };
    Ok(std::fs::canonicalize(&common).unwrap_or(common))
}

/// Whether a filesystem event under the git dir can change the worktree list.
///
/// Index writes happen on every status call, so reacting to them would
/// make each refresh trigger the next one.
fn is_relevant(event: &NotifyEvent) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        !(name == "index" || name.ends_with(".lock") || name == "FETCH_HEAD")
    })
}

/// A running watcher. Dropping it stops the filesystem watch.
pub struct GitDirWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl GitDirWatcher {
    /// Stop the debounce task and the underlying watcher.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Start watching `common_dir`, running `try_reconcile` after each burst.
pub fn spawn_git_dir_watcher(
    common_dir: &Path,
    reconciler: Arc<Reconciler>,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<GitDirWatcher> {
    let (tx, rx) = mpsc::channel::<()>(64);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
        match res {
            Ok(event) if is_relevant(&event) => {
                // A full channel already guarantees a pending refresh.
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "git dir watch error"),
        }
    })?;

    let mut watched = 0;
    for sub in WATCHED_SUBDIRS {
        let dir = common_dir.join(sub);
        if dir.is_dir() {
            watcher.watch(&dir, RecursiveMode::Recursive)?;
            watched += 1;
            debug!(path = %dir.display(), "watching git dir");
        }
    }
    info!(common_dir = %common_dir.display(), watched, "git dir watcher started");

    let task = tokio::spawn(debounce_loop(rx, debounce, cancel, move || {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move {
            if let Some(Err(e)) = reconciler.try_reconcile().await {
                debug!(error = %e, "watcher-triggered refresh failed");
            }
        });
    }));

    Ok(GitDirWatcher {
        _watcher: watcher,
        task,
    })
}

/// Fire `on_quiet` once per burst of signals, after `debounce` of silence.
async fn debounce_loop(
    mut rx: mpsc::Receiver<()>,
    debounce: Duration,
    cancel: CancellationToken,
    mut on_quiet: impl FnMut() + Send,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            signal = rx.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                next = tokio::time::timeout(debounce, rx.recv()) => match next {
                    Ok(Some(())) => {}
                    Ok(None) => return,
                    Err(_) => break,
                },
            }
        }
        debug!("git dir changed, requesting refresh");
        on_quiet();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use notify::event::{AccessKind, CreateKind, ModifyKind};

    use super::*;
    use crate::testing::{FakeRunner, Reply};

    fn event(kind: EventKind, path: &str) -> NotifyEvent {
        NotifyEvent::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn index_churn_is_ignored() {
        assert!(!is_relevant(&event(
            EventKind::Modify(ModifyKind::Any),
            "/r/.git/worktrees/a/index"
        )));
        assert!(!is_relevant(&event(
            EventKind::Create(CreateKind::File),
            "/r/.git/refs/heads/x.lock"
        )));
        assert!(!is_relevant(&event(
            EventKind::Access(AccessKind::Any),
            "/r/.git/refs/heads/x"
        )));
        assert!(is_relevant(&event(
            EventKind::Create(CreateKind::Folder),
            "/r/.git/worktrees/b"
        )));
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_refresh() {
        let debounce = Duration::from_millis(60);
        let (tx, rx) = mpsc::channel(64);
        let fired = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let task = {
            let fired = Arc::clone(&fired);
            tokio::spawn(debounce_loop(rx, debounce, cancel.clone(), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }))
        };

        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn relative_common_dir_is_joined_to_repo() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        let runner = FakeRunner::new();
        runner.on(&["rev-parse", "--git-common-dir"], Reply::ok(".git\n"));

        let dir = resolve_common_dir(&runner, tmp.path(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(dir, std::fs::canonicalize(tmp.path().join(".git")).unwrap());
    }
}
