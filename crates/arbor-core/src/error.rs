//! Error types for Arbor core library.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::CommandError;

/// Result type alias using Arbor Error.
pub type Result<T> = std::result::Result<T, Error>;

/// How a rename that failed after its directory move was left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InconsistentKind {
    /// The directory was moved back and git agrees with it; nothing changed.
    RolledBack,
    /// The directory could not be restored. The repository needs manual repair.
    ManualRepairRequired,
}

impl std::fmt::Display for InconsistentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RolledBack => f.write_str("rolled back"),
            Self::ManualRepairRequired => f.write_str("manual repair required"),
        }
    }
}

/// Flat classification of [`Error`], carried in operation failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    LaunchFailed,
    TimedOut,
    NonZeroExit,
    ValidationFailed,
    AlreadyInProgress,
    FilesystemMoveFailed,
    RenameRolledBack,
    ManualRepairRequired,
    ReconciliationStale,
    Internal,
}

/// Core error types for Arbor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The external program could not be started.
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program was killed after exceeding its timeout.
    #[error("Command `{command}` timed out after {}s", .timeout.as_secs_f32())]
    TimedOut { command: String, timeout: Duration },

    /// git ran but reported failure.
    #[error("Command `{command}` exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Operator input was rejected before anything was touched.
    #[error("Invalid input: {0}")]
    ValidationFailed(String),

    /// Another operation already holds the worktree.
    #[error("An operation is already in progress for {}", .0.display())]
    AlreadyInProgress(PathBuf),

    /// The directory move of a rename failed; nothing was changed.
    #[error("Failed to move {} to {}{}: {source}", .from.display(), .to.display(), cross_device_note(.cross_device))]
    FilesystemMoveFailed {
        from: PathBuf,
        to: PathBuf,
        cross_device: bool,
        #[source]
        source: std::io::Error,
    },

    /// Metadata repair failed after the directory had already moved.
    #[error("Rename of {} to {} failed ({kind}): {message}", .path.display(), .new_path.display())]
    RenameInconsistent {
        kind: InconsistentKind,
        path: PathBuf,
        new_path: PathBuf,
        message: String,
    },

    /// The worktree listing failed; the previous snapshot was kept.
    #[error("Worktree list is stale: {0}")]
    ReconciliationStale(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem watcher error
    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const fn cross_device_note(cross_device: &bool) -> &'static str {
    if *cross_device {
        " (cross-device move)"
    } else {
        ""
    }
}

impl Error {
    /// Classify this error for operation failure events.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            Self::FilesystemMoveFailed { .. } => ErrorKind::FilesystemMoveFailed,
            Self::RenameInconsistent {
                kind: InconsistentKind::RolledBack,
                ..
            } => ErrorKind::RenameRolledBack,
            Self::RenameInconsistent {
                kind: InconsistentKind::ManualRepairRequired,
                ..
            } => ErrorKind::ManualRepairRequired,
            Self::ReconciliationStale(_) => ErrorKind::ReconciliationStale,
            Self::Config(_) | Self::Watch(_) | Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the repository was left in a state only the operator can fix.
    pub const fn requires_manual_repair(&self) -> bool {
        matches!(
            self,
            Self::RenameInconsistent {
                kind: InconsistentKind::ManualRepairRequired,
                ..
            }
        )
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::LaunchFailed { program, source } => Self::LaunchFailed { program, source },
            CommandError::TimedOut { command, timeout } => Self::TimedOut { command, timeout },
        }
    }
}
