//! Manager: mount lifecycle and descriptor creation.
//!
//! Descriptor creation follows the anonymous-file idiom: register the
//! buffer under a fresh name, open the entry through the mount to obtain
//! an OS file descriptor, then retire the name. No other process can
//! discover the entry, while the open descriptor keeps the inode alive
//! through the kernel's reference (honored until `forget`).

use std::fs::DirBuilder;
use std::os::fd::OwnedFd;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs, process};

use fuser::{BackgroundSession, MountOption};
use tracing::{debug, error, trace};

use lazyfd_buffers::{LinearBuffer, SparseBuffer};
use lazyfd_common::FS_NAME;

use crate::adapter::BufferAdapter;
use crate::filesystem::{FsState, MemFs};
use crate::options::{ManagerOptions, OpenMode};
use crate::Error;

/// Manager of lazily-populated memory descriptors, backed by a mounted
/// synthetic filesystem.
///
/// Dropping a manager without calling [`shutdown`](Self::shutdown)
/// unmounts the filesystem but leaves the mountpoint directory behind.
pub struct Manager {
    mountpoint: PathBuf,
    /// Whether this manager created the mountpoint directory and is
    /// responsible for removing it at shutdown.
    remove_dir: bool,
    state: Arc<FsState>,
    session: Option<BackgroundSession>,
}

impl Manager {
    /// Mount a filesystem instance and return its manager.
    ///
    /// Resolves the mountpoint from `options` (default:
    /// `${XDG_RUNTIME_DIR:-/run}/lazyfd/<pid>`) and creates it with mode
    /// `0o700` if absent. A failed mount rolls back directory creation.
    pub fn new(options: ManagerOptions) -> Result<Self, Error> {
        let mountpoint: PathBuf = options.mountpoint.unwrap_or_else(default_mountpoint);

        let remove_dir: bool = !mountpoint.exists();
        if remove_dir {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&mountpoint)
                .map_err(|source| Error::Mountpoint {
                    path: mountpoint.clone(),
                    source,
                })?;
        }

        let state: Arc<FsState> = Arc::new(FsState::new());
        let mount_options = [
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::Subtype(FS_NAME.to_string()),
        ];

        let session = match fuser::spawn_mount2(MemFs::new(Arc::clone(&state)), &mountpoint, &mount_options) {
            Ok(session) => session,
            Err(source) => {
                if remove_dir {
                    let _ = fs::remove_dir(&mountpoint);
                }
                return Err(Error::MountFailed(source));
            }
        };

        debug!(mountpoint = %mountpoint.display(), "mounted");

        Ok(Self {
            mountpoint,
            remove_dir,
            state,
            session: Some(session),
        })
    }

    /// The directory the filesystem is mounted at.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Create a shared descriptor over a linear buffer.
    ///
    /// Shared descriptors may be opened read-write: consumer writes
    /// (including `MAP_SHARED` write-back) land in the buffer's backing
    /// storage.
    ///
    /// # Arguments
    /// * `size` - Logical size in bytes, normally `buffer.len()`
    /// * `mode` - Access mode of the returned descriptor
    /// * `buffer` - The backing buffer; the close signal fires when the
    ///   kernel releases the last handle
    pub fn create_shared(
        &self,
        size: u64,
        mode: OpenMode,
        buffer: Arc<LinearBuffer>,
    ) -> Result<OwnedFd, Error> {
        self.create(BufferAdapter::shared(size, buffer), mode)
    }

    /// Create a cloned descriptor over a linear buffer.
    ///
    /// Read-only by contract; the kernel may map multiple private views.
    pub fn create_cloned(
        &self,
        size: u64,
        mode: OpenMode,
        buffer: Arc<LinearBuffer>,
    ) -> Result<OwnedFd, Error> {
        self.create(BufferAdapter::cloned(size, buffer), mode)
    }

    /// Create a temporal descriptor over a sparse buffer.
    ///
    /// Read-only, and each byte range is delivered at most once; the
    /// consumer's page cache (kept across faults) is the only copy.
    pub fn create_temporal(
        &self,
        size: u64,
        mode: OpenMode,
        buffer: Arc<SparseBuffer>,
    ) -> Result<OwnedFd, Error> {
        self.create(BufferAdapter::temporal(size, buffer), mode)
    }

    /// Register, open, retire the name.
    fn create(&self, adapter: BufferAdapter, mode: OpenMode) -> Result<OwnedFd, Error> {
        let adapter: Arc<BufferAdapter> = Arc::new(adapter);
        let (ino, name) = self.state.register(Arc::clone(&adapter));
        let path: PathBuf = self.mountpoint.join(&name);

        let opened = mode.open(&path);

        // The entry is only needed for the open above; retire it so the
        // descriptor is anonymous from here on.
        self.state.forget_name(&name);

        match opened {
            Ok(file) => {
                trace!(ino, "descriptor created");
                Ok(OwnedFd::from(file))
            }
            Err(source) => {
                self.state.forget_node(ino);
                adapter.close();
                error!(ino, path = %path.display(), %source, "opening registered entry failed");
                Err(Error::OpenEntry { path, source })
            }
        }
    }

    /// Unmount the filesystem, join its server, and remove the
    /// mountpoint directory when this manager created it.
    pub fn shutdown(mut self) -> Result<(), Error> {
        if let Some(session) = self.session.take() {
            session.join();
        }

        if self.remove_dir {
            fs::remove_dir(&self.mountpoint).map_err(|source| Error::Mountpoint {
                path: self.mountpoint.clone(),
                source,
            })?;
        }

        debug!(mountpoint = %self.mountpoint.display(), "shut down");
        Ok(())
    }
}

/// `${XDG_RUNTIME_DIR:-/run}/lazyfd/<pid>`
fn default_mountpoint() -> PathBuf {
    let run_dir: PathBuf = env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/run"));

    run_dir.join(FS_NAME).join(process::id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mountpoint_is_per_process() {
        let path: PathBuf = default_mountpoint();
        let pid: String = process::id().to_string();

        assert!(path.ends_with(Path::new(FS_NAME).join(&pid)));
    }
}
