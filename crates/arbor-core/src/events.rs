//! Events published to the front end.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::ErrorKind;
use crate::registry::Diff;
use crate::worktree::WorktreeRecord;

/// Default capacity of the event channel.
pub const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Mutating operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Remove,
    Rename,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
            Self::Rename => f.write_str("rename"),
        }
    }
}

/// Everything the core tells the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    Reconciled {
        adds: Vec<WorktreeRecord>,
        updates: Vec<WorktreeRecord>,
        removes: Vec<PathBuf>,
    },
    /// Advisory: the listing failed and the previous snapshot was kept.
    ReconciliationStale { message: String },
    /// Advisory: a per-worktree status check failed.
    RecordWarning { path: PathBuf, message: String },
    OperationStarted {
        path: PathBuf,
        kind: OperationKind,
    },
    OperationSucceeded {
        path: PathBuf,
        kind: OperationKind,
        /// The resulting record; `None` after a remove.
        record: Option<WorktreeRecord>,
    },
    OperationFailed {
        path: PathBuf,
        kind: OperationKind,
        error_kind: ErrorKind,
        message: String,
    },
}

impl From<Diff> for CoreEvent {
    fn from(diff: Diff) -> Self {
        Self::Reconciled {
            adds: diff.adds,
            updates: diff.updates,
            removes: diff.removes,
        }
    }
}

/// Broadcast fan-out of [`CoreEvent`]s. Sending with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CoreEvent) {
        trace!(?event, "core event");
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BROADCAST_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(CoreEvent::ReconciliationStale {
            message: "timed out".into(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            CoreEvent::ReconciliationStale {
                message: "timed out".into()
            }
        );
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        EventBus::new(4).emit(CoreEvent::Reconciled {
            adds: Vec::new(),
            updates: Vec::new(),
            removes: Vec::new(),
        });
    }
}
