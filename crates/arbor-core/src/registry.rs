//! In-memory worktree registry.
//!
//! The registry owns every [`WorktreeRecord`]. Records are keyed by path, so
//! two records can never share one. All state sits behind a single
//! `RwLock` whose critical sections never await: a reader sees either the
//! state before a diff or the state after it, never a mix.
//!
//! Writers:
//! - the reconciler, through [`Registry::apply_diff`];
//! - the operation controller, through [`PathLock`] / [`Reservation`] and
//!   [`Registry::commit_rename`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::debug;

use crate::error::Error;
use crate::worktree::{BranchRef, SortOrder, WorktreeRecord};

/// Ordered, immutable copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Bumped every time a non-empty change is applied.
    pub generation: u64,
    pub records: Vec<WorktreeRecord>,
}

impl Snapshot {
    pub fn get(&self, path: &Path) -> Option<&WorktreeRecord> {
        self.records.iter().find(|r| r.path == path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorktreeRecord> {
        self.records.iter()
    }
}

/// Changes between two registry states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub adds: Vec<WorktreeRecord>,
    pub updates: Vec<WorktreeRecord>,
    pub removes: Vec<PathBuf>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.removes.is_empty()
    }
}

/// Compare `candidates` against `previous` by path.
///
/// With a `scope`, only that path is considered on either side. A worktree
/// renamed outside the tool shows up as a remove plus an add.
pub fn diff_records<'a>(
    previous: impl IntoIterator<Item = &'a WorktreeRecord>,
    candidates: Vec<WorktreeRecord>,
    scope: Option<&Path>,
) -> Diff {
    let in_scope = |path: &Path| scope.is_none_or(|s| s == path);

    let mut remaining: BTreeMap<PathBuf, WorktreeRecord> = candidates
        .into_iter()
        .filter(|c| in_scope(&c.path))
        .map(|c| (c.path.clone(), c))
        .collect();

    let mut diff = Diff::default();
    for old in previous.into_iter().filter(|r| in_scope(&r.path)) {
        match remaining.remove(&old.path) {
            Some(candidate) if candidate.derived_differs(old) => diff.updates.push(candidate),
            Some(_) => {}
            None => diff.removes.push(old.path.clone()),
        }
    }
    diff.adds = remaining.into_values().collect();
    diff
}

/// Why a lock or reservation could not be taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("{} is locked by another operation", .0.display())]
    AlreadyLocked(PathBuf),
    #[error("{} is reserved by another operation", .0.display())]
    Reserved(PathBuf),
    #[error("no worktree at {}", .0.display())]
    NotFound(PathBuf),
    #[error("{} is already a known worktree", .0.display())]
    Occupied(PathBuf),
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyLocked(path) | LockError::Reserved(path) => {
                Self::AlreadyInProgress(path)
            }
            other @ (LockError::NotFound(_) | LockError::Occupied(_)) => {
                Self::ValidationFailed(other.to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    records: BTreeMap<PathBuf, WorktreeRecord>,
    reserved: HashSet<PathBuf>,
    generation: u64,
    order: SortOrder,
}

/// The authoritative in-memory set of worktrees.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(order: SortOrder) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                order,
                ..RegistryState::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ordered copy of the current records.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.read();
        let mut records: Vec<_> = state.records.values().cloned().collect();
        let order = state.order;
        records.sort_by(|a, b| order.compare(a, b));
        Snapshot {
            generation: state.generation,
            records,
        }
    }

    pub fn get(&self, path: &Path) -> Option<WorktreeRecord> {
        self.read().records.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().records.contains_key(path)
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.read().reserved.contains(path)
    }

    pub fn order(&self) -> SortOrder {
        self.read().order
    }

    pub fn set_order(&self, order: SortOrder) {
        self.write().order = order;
    }

    /// Diff `candidates` against the current records without applying it.
    pub fn diff_against(&self, candidates: Vec<WorktreeRecord>, scope: Option<&Path>) -> Diff {
        let state = self.read();
        diff_records(state.records.values(), candidates, scope)
    }

    /// Apply a reconciliation diff atomically and return what was applied.
    ///
    /// Updates and removes for locked records are dropped, and so are adds
    /// for paths that are already known or reserved: those belong to the
    /// operation holding them.
    pub fn apply_diff(&self, diff: Diff) -> Diff {
        let mut state = self.write();
        let mut applied = Diff::default();

        for removed in diff.removes {
            if state.records.get(&removed).is_some_and(|r| !r.locked) {
                state.records.remove(&removed);
                applied.removes.push(removed);
            }
        }
        for mut updated in diff.updates {
            let Some(existing) = state.records.get_mut(&updated.path) else {
                continue;
            };
            if existing.locked {
                continue;
            }
            updated.locked = false;
            *existing = updated.clone();
            applied.updates.push(updated);
        }
        for mut added in diff.adds {
            if state.records.contains_key(&added.path) || state.reserved.contains(&added.path) {
                continue;
            }
            added.locked = false;
            state.records.insert(added.path.clone(), added.clone());
            applied.adds.push(added);
        }

        if !applied.is_empty() {
            state.generation += 1;
            debug!(
                generation = state.generation,
                adds = applied.adds.len(),
                updates = applied.updates.len(),
                removes = applied.removes.len(),
                "registry diff applied"
            );
        }
        applied
    }

    /// Take exclusive access to an existing record.
    pub fn try_lock(self: &Arc<Self>, path: &Path) -> Result<PathLock, LockError> {
        let mut state = self.write();
        let record = state
            .records
            .get_mut(path)
            .ok_or_else(|| LockError::NotFound(path.to_path_buf()))?;
        if record.locked {
            return Err(LockError::AlreadyLocked(path.to_path_buf()));
        }
        record.locked = true;
        debug!(path = %path.display(), "worktree locked");
        Ok(PathLock {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }

    /// Clear the lock flag on `path`. A missing record is ignored.
    pub fn unlock(&self, path: &Path) {
        if let Some(record) = self.write().records.get_mut(path) {
            record.locked = false;
            debug!(path = %path.display(), "worktree unlocked");
        }
    }

    /// Claim a path that is about to become a worktree.
    pub fn reserve(self: &Arc<Self>, path: &Path) -> Result<Reservation, LockError> {
        let mut state = self.write();
        if state.records.contains_key(path) {
            return Err(LockError::Occupied(path.to_path_buf()));
        }
        if !state.reserved.insert(path.to_path_buf()) {
            return Err(LockError::Reserved(path.to_path_buf()));
        }
        Ok(Reservation {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }

    fn release(&self, path: &Path) {
        self.write().reserved.remove(path);
    }

    /// Move a locked record to `new_path` after a completed rename.
    ///
    /// The record stays locked under its new key until `lock` is dropped.
    pub fn commit_rename(
        &self,
        lock: &mut PathLock,
        new_path: &Path,
        new_branch: Option<BranchRef>,
    ) -> Option<WorktreeRecord> {
        let mut state = self.write();
        let mut record = state.records.remove(&lock.path)?;
        record.path = new_path.to_path_buf();
        if let Some(branch) = new_branch {
            record.branch = branch;
        }
        state.records.insert(record.path.clone(), record.clone());
        state.generation += 1;
        lock.path = new_path.to_path_buf();
        Some(record)
    }
}

/// Exclusive hold on one record; unlocks on drop.
#[derive(Debug)]
pub struct PathLock {
    registry: Arc<Registry>,
    path: PathBuf,
}

impl PathLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        self.registry.unlock(&self.path);
    }
}

/// Claim on a path that is not (yet) a record; released on drop.
#[derive(Debug)]
pub struct Reservation {
    registry: Arc<Registry>,
    path: PathBuf,
}

impl Reservation {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.release(&self.path);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(path: &str, branch: &str) -> WorktreeRecord {
        WorktreeRecord::new(path, BranchRef::Named(branch.into()))
    }

    fn seeded(paths: &[&str]) -> Arc<Registry> {
        let registry = Arc::new(Registry::default());
        let diff = Diff {
            adds: paths.iter().map(|p| record(p, "b")).collect(),
            ..Diff::default()
        };
        registry.apply_diff(diff);
        registry
    }

    #[test]
    fn diff_classifies_adds_updates_removes() {
        let previous = [record("/wt/a", "a"), record("/wt/b", "b")];
        let mut changed = record("/wt/b", "b");
        changed.is_dirty = true;
        let candidates = vec![record("/wt/a", "a"), changed, record("/wt/c", "c")];

        let diff = diff_records(&previous, candidates, None);
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].path, PathBuf::from("/wt/c"));
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.updates[0].path, PathBuf::from("/wt/b"));
        assert!(diff.removes.is_empty());
    }

    #[test]
    fn external_rename_is_remove_plus_add() {
        let previous = [record("/wt/old", "x")];
        let diff = diff_records(&previous, vec![record("/wt/new", "x")], None);
        assert_eq!(diff.removes, vec![PathBuf::from("/wt/old")]);
        assert_eq!(diff.adds[0].path, PathBuf::from("/wt/new"));
        assert!(diff.updates.is_empty());
    }

    #[test]
    fn scoped_diff_ignores_other_paths() {
        let previous = [record("/wt/a", "a"), record("/wt/b", "b")];
        let diff = diff_records(&previous, vec![record("/wt/c", "c")], Some(Path::new("/wt/a")));
        assert_eq!(diff.removes, vec![PathBuf::from("/wt/a")]);
        assert!(diff.adds.is_empty());
    }

    #[test]
    fn duplicate_candidates_collapse_to_one_record() {
        let registry = Registry::default();
        let diff = registry.diff_against(vec![record("/wt/a", "a"), record("/wt/a", "a")], None);
        registry.apply_diff(diff);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn applied_diff_bumps_generation_only_when_non_empty() {
        let registry = seeded(&["/wt/a"]);
        let before = registry.snapshot().generation;
        let applied = registry.apply_diff(Diff::default());
        assert!(applied.is_empty());
        assert_eq!(registry.snapshot().generation, before);
    }

    #[test]
    fn lock_is_exclusive() {
        let registry = seeded(&["/wt/a"]);
        let lock = registry.try_lock(Path::new("/wt/a")).unwrap();
        assert!(registry.get(Path::new("/wt/a")).unwrap().locked);
        assert_eq!(
            registry.try_lock(Path::new("/wt/a")).unwrap_err(),
            LockError::AlreadyLocked(PathBuf::from("/wt/a"))
        );
        drop(lock);
        assert!(!registry.get(Path::new("/wt/a")).unwrap().locked);
        assert!(registry.try_lock(Path::new("/wt/a")).is_ok());
    }

    #[test]
    fn lock_on_unknown_path_fails() {
        let registry = seeded(&[]);
        assert!(matches!(
            registry.try_lock(Path::new("/nope")),
            Err(LockError::NotFound(_))
        ));
    }

    #[test]
    fn locked_records_survive_diffs() {
        let registry = seeded(&["/wt/a"]);
        let _lock = registry.try_lock(Path::new("/wt/a")).unwrap();

        let mut dirty = record("/wt/a", "b");
        dirty.is_dirty = true;
        let applied = registry.apply_diff(Diff {
            updates: vec![dirty],
            removes: vec![PathBuf::from("/wt/a")],
            ..Diff::default()
        });

        assert!(applied.is_empty());
        let current = registry.get(Path::new("/wt/a")).unwrap();
        assert!(current.locked);
        assert!(!current.is_dirty);
    }

    #[test]
    fn reserved_paths_are_not_added() {
        let registry = seeded(&[]);
        let reservation = registry.reserve(Path::new("/wt/new")).unwrap();
        let applied = registry.apply_diff(Diff {
            adds: vec![record("/wt/new", "n")],
            ..Diff::default()
        });
        assert!(applied.is_empty());
        assert!(matches!(
            registry.reserve(Path::new("/wt/new")),
            Err(LockError::Reserved(_))
        ));
        drop(reservation);
        assert!(!registry.is_reserved(Path::new("/wt/new")));
    }

    #[test]
    fn reserving_a_known_path_fails() {
        let registry = seeded(&["/wt/a"]);
        assert!(matches!(
            registry.reserve(Path::new("/wt/a")),
            Err(LockError::Occupied(_))
        ));
    }

    #[test]
    fn commit_rename_moves_key_and_keeps_lock() {
        let registry = seeded(&["/wt/a"]);
        let mut lock = registry.try_lock(Path::new("/wt/a")).unwrap();
        let renamed = registry
            .commit_rename(&mut lock, Path::new("/wt/z"), Some(BranchRef::Named("z".into())))
            .unwrap();

        assert_eq!(renamed.path, PathBuf::from("/wt/z"));
        assert!(registry.get(Path::new("/wt/a")).is_none());
        assert!(registry.get(Path::new("/wt/z")).unwrap().locked);
        drop(lock);
        let record = registry.get(Path::new("/wt/z")).unwrap();
        assert!(!record.locked);
        assert_eq!(record.branch, BranchRef::Named("z".into()));
    }

    #[test]
    fn snapshot_follows_sort_order() {
        let registry = seeded(&["/wt/b", "/wt/a"]);
        let mut active = record("/wt/b", "b");
        active.is_active = true;
        registry.apply_diff(Diff {
            updates: vec![active],
            ..Diff::default()
        });

        assert_eq!(registry.snapshot().records[0].path, PathBuf::from("/wt/a"));
        registry.set_order(SortOrder::ActiveFirst);
        assert_eq!(registry.snapshot().records[0].path, PathBuf::from("/wt/b"));
    }

    #[test]
    fn readers_never_observe_partial_diffs() {
        let paths: Vec<String> = (0..16).map(|i| format!("/wt/{i:02}")).collect();
        let registry = seeded(&paths.iter().map(String::as_str).collect::<Vec<_>>());

        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    let snapshot = registry.snapshot();
                    let heads: HashSet<_> = snapshot.iter().map(|r| r.head.clone()).collect();
                    assert_eq!(heads.len(), 1, "torn snapshot: {heads:?}");
                    assert_eq!(snapshot.len(), 16);
                }
            })
        };

        for pass in 0..500 {
            let candidates = paths
                .iter()
                .map(|p| WorktreeRecord {
                    head: format!("pass-{pass}"),
                    ..record(p, "b")
                })
                .collect();
            let diff = registry.diff_against(candidates, None);
            registry.apply_diff(diff);
        }
        reader.join().unwrap();
    }
}
