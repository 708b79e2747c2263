//! Directory move primitive used by rename.

use std::io;
use std::path::Path;

use async_trait::async_trait;

/// Moves a directory within one filesystem.
#[async_trait]
pub trait DirMover: Send + Sync {
    /// Move `from` to `to`. `to` must not exist.
    async fn move_dir(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `rename(2)` through `tokio::fs`. Never falls back to copy-and-delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDirMover;

#[async_trait]
impl DirMover for TokioDirMover {
    async fn move_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        if tokio::fs::try_exists(to).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        tokio::fs::rename(from, to).await
    }
}

/// Whether `err` means the move crossed a filesystem boundary.
pub fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}
