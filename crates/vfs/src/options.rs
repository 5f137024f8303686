//! Configuration for the manager.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Configuration options for a [`Manager`](crate::Manager).
///
/// Logging is not configured here: the manager and filesystem emit
/// per-operation `tracing` events at trace level and error events on
/// failure paths, routed by whatever subscriber the caller installs.
///
/// # Example
///
/// ```
/// use lazyfd_vfs::ManagerOptions;
///
/// let options = ManagerOptions::default().with_mountpoint("/tmp/lazyfd-test");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Mountpoint override. When `None`, the manager mounts at
    /// `${XDG_RUNTIME_DIR:-/run}/lazyfd/<pid>`.
    pub mountpoint: Option<PathBuf>,
}

impl ManagerOptions {
    /// Set an explicit mountpoint.
    ///
    /// # Arguments
    /// * `mountpoint` - Directory to mount the filesystem at; created
    ///   (mode `0o700`, recursively) if absent.
    pub fn with_mountpoint(mut self, mountpoint: impl Into<PathBuf>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }
}

/// Access mode a descriptor is opened with.
///
/// Shared buffers accept [`ReadWrite`](OpenMode::ReadWrite); cloned and
/// temporal buffers are read-only by contract (a read-write descriptor
/// on them opens, but every kernel write-back fails with `ENOSYS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open the descriptor for reading.
    ReadOnly,
    /// Open the descriptor for reading and writing.
    ReadWrite,
}

impl OpenMode {
    /// Open `path` with this mode.
    pub(crate) fn open(self, path: &Path) -> io::Result<File> {
        let mut options: OpenOptions = OpenOptions::new();
        options.read(true);
        if self == OpenMode::ReadWrite {
            options.write(true);
        }
        options.open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mountpoint_builder() {
        let options: ManagerOptions = ManagerOptions::default();
        assert!(options.mountpoint.is_none());

        let options = options.with_mountpoint("/tmp/x");
        assert_eq!(options.mountpoint.as_deref(), Some(Path::new("/tmp/x")));
    }
}
