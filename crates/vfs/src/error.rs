//! Error types for the manager surface.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`Manager`](crate::Manager) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The mountpoint directory could not be created or removed.
    #[error("mountpoint {}: {source}", path.display())]
    Mountpoint {
        /// The mountpoint path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The FUSE mount failed. Directory creation has been rolled back.
    #[error("mount failed: {0}")]
    MountFailed(#[source] io::Error),

    /// The freshly registered directory entry could not be opened.
    /// The buffer has been deregistered and closed.
    #[error("open {}: {source}", path.display())]
    OpenEntry {
        /// Path of the entry that failed to open.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}
