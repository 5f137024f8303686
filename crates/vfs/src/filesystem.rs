//! Synthetic FUSE filesystem serving one pseudo-file per registered
//! buffer.
//!
//! The root directory never lists anything: entries exist only for the
//! short window between registration and the manager's open, and are
//! looked up by exact name. Every other operation resolves an inode to
//! its registered buffer adapter and dispatches to it.
//!
//! Blocking reads run on dispatch threads with the reply moved in: the
//! session loop must keep serving releases, forgets, and other buffers'
//! operations while a read waits for its producer.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    consts::FOPEN_KEEP_CACHE, FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use tracing::{debug, trace};

use lazyfd_common::{BufferError, FS_IO_SIZE, PAGE_SIZE};

use crate::adapter::BufferAdapter;

/// Attribute validity reported to the kernel. Buffer attributes never
/// change, so the kernel must never re-query: two hundred years out.
const TTL_NEVER: Duration = Duration::from_secs(200 * 365 * 24 * 60 * 60);

/// Maximum filename length reported by statfs.
const NAME_MAX: u32 = 255;

// ============================================================================
// Filesystem State
// ============================================================================

/// Shared filesystem state: the inode and name registries.
///
/// Held by both the mounted filesystem and the manager. The single lock
/// guards only the maps; it is released before any call into a buffer.
pub(crate) struct FsState {
    uid: u32,
    gid: u32,
    inner: Mutex<Registry>,
}

struct Registry {
    /// Registered buffers by inode id.
    nodes: HashMap<u64, Arc<BufferAdapter>>,
    /// Directory entries by name. An entry is retired right after the
    /// manager opens it; the inode stays reachable through the handle.
    names: HashMap<String, u64>,
    /// Last assigned inode id, seeded with the root id.
    last_id: u64,
}

impl FsState {
    pub fn new() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            inner: Mutex::new(Registry {
                nodes: HashMap::new(),
                names: HashMap::new(),
                last_id: FUSE_ROOT_ID,
            }),
        }
    }

    /// Register a buffer under a fresh inode id and a fresh entry name.
    ///
    /// Inode ids are monotonic; names are base-36 renderings of random
    /// 64-bit values, re-drawn on collision so a name is unique at
    /// issuance.
    pub fn register(&self, adapter: Arc<BufferAdapter>) -> (u64, String) {
        let mut inner = self.inner.lock().unwrap();

        inner.last_id += 1;
        let id: u64 = inner.last_id;

        let name: String = loop {
            let candidate: String = base36(rand::random::<u64>());
            if !inner.names.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.nodes.insert(id, adapter);
        inner.names.insert(name.clone(), id);

        trace!(ino = id, %name, "buffer registered");
        (id, name)
    }

    /// Retire a directory entry. The inode is unaffected.
    pub fn forget_name(&self, name: &str) {
        self.inner.lock().unwrap().names.remove(name);
    }

    /// Drop a registered buffer.
    pub fn forget_node(&self, ino: u64) {
        self.inner.lock().unwrap().nodes.remove(&ino);
    }

    fn node(&self, ino: u64) -> Option<Arc<BufferAdapter>> {
        self.inner.lock().unwrap().nodes.get(&ino).cloned()
    }

    fn lookup_name(&self, name: &str) -> Option<(u64, Arc<BufferAdapter>)> {
        let inner = self.inner.lock().unwrap();
        let id: u64 = *inner.names.get(name)?;
        let node: Arc<BufferAdapter> = inner.nodes.get(&id)?.clone();
        Some((id, node))
    }

    /// Total pages across registered buffers and the inode count,
    /// for statfs.
    fn totals(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap();
        let page: u64 = PAGE_SIZE as u64;
        let pages: u64 = inner
            .nodes
            .values()
            .map(|node| (node.size() + page - 1) / page)
            .sum();
        (pages, inner.nodes.len() as u64 + 1)
    }

    /// Attributes of the mount root.
    fn root_attr(&self) -> FileAttr {
        FileAttr {
            ino: FUSE_ROOT_ID,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: FileType::Directory,
            perm: 0o500,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: PAGE_SIZE as u32,
            flags: 0,
        }
    }

    /// Attributes of a buffer pseudo-file.
    fn buffer_attr(&self, ino: u64, size: u64) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o700,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: PAGE_SIZE as u32,
            flags: 0,
        }
    }
}

/// Render a value in base 36, lowercase.
fn base36(mut value: u64) -> String {
    let mut out: String = String::new();
    loop {
        let digit: u32 = (value % 36) as u32;
        out.insert(0, char::from_digit(digit, 36).unwrap_or('0'));
        value /= 36;
        if value == 0 {
            break out;
        }
    }
}

// ============================================================================
// FUSE Operations
// ============================================================================

/// The mounted filesystem: a thin dispatcher over [`FsState`].
pub(crate) struct MemFs {
    state: Arc<FsState>,
}

impl MemFs {
    pub fn new(state: Arc<FsState>) -> Self {
        Self { state }
    }
}

impl Filesystem for MemFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }

        let name: &str = match name.to_str() {
            Some(name) => name,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.state.lookup_name(name) {
            Some((ino, node)) => {
                trace!(ino, name, "lookup");
                reply.entry(&TTL_NEVER, &self.state.buffer_attr(ino, node.size()), 0);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        if ino == FUSE_ROOT_ID {
            reply.attr(&TTL_NEVER, &self.state.root_attr());
            return;
        }

        match self.state.node(ino) {
            Some(node) => reply.attr(&TTL_NEVER, &self.state.buffer_attr(ino, node.size())),
            None => reply.error(libc::ENOENT),
        }
    }

    // The kernel issues setattr at mmap time; accept it without effect.
    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if ino == FUSE_ROOT_ID {
            reply.attr(&TTL_NEVER, &self.state.root_attr());
            return;
        }

        match self.state.node(ino) {
            Some(node) => reply.attr(&TTL_NEVER, &self.state.buffer_attr(ino, node.size())),
            None => reply.error(libc::ENOENT),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        if self.state.node(ino).is_none() {
            // Existed at lookup, forgotten since.
            reply.error(libc::EIO);
            return;
        }

        trace!(ino, "open");

        // KEEP_CACHE is load-bearing: consuming reads must never be
        // re-issued for pages the consumer already faulted in.
        reply.opened(ino, FOPEN_KEEP_CACHE);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let node: Arc<BufferAdapter> = match self.state.node(ino) {
            Some(node) => node,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        trace!(ino, offset, size, "read");

        // The read may wait indefinitely for the producer; move the
        // reply to a dispatch thread so the session loop stays live.
        thread::spawn(move || {
            let offset: u64 = offset.max(0) as u64;
            let want: usize = (size as u64).min(node.size().saturating_sub(offset)) as usize;
            let mut buf: Vec<u8> = vec![0; want];

            match node.read_at(&mut buf, offset) {
                Ok(n) => reply.data(&buf[..n]),
                Err(BufferError::EndOfData) => reply.data(&[]),
                Err(err) => {
                    debug!(ino, %err, "read failed");
                    reply.error(libc::EIO);
                }
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let node: Arc<BufferAdapter> = match self.state.node(ino) {
            Some(node) => node,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        trace!(ino, offset, len = data.len(), "write");

        let offset: u64 = offset.max(0) as u64;
        let want: usize = (data.len() as u64).min(node.size().saturating_sub(offset)) as usize;

        match node.write_at(&data[..want], offset) {
            Ok(_) => reply.written(data.len() as u32),
            Err(BufferError::NotSupported) => reply.error(libc::ENOSYS),
            Err(err) => {
                debug!(ino, %err, "write failed");
                reply.error(libc::EIO);
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.state.node(ino) {
            Some(_) => reply.ok(),
            None => reply.error(libc::ENOENT),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // Handle id == inode id, assigned at open.
        match self.state.node(fh) {
            Some(node) => {
                trace!(ino = fh, "release");
                node.close();
                reply.ok();
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        if ino != FUSE_ROOT_ID {
            trace!(ino, "forget");
            self.state.forget_node(ino);
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let (pages, files) = self.state.totals();
        reply.statfs(
            pages,
            0,
            0,
            files,
            0,
            FS_IO_SIZE,
            NAME_MAX,
            PAGE_SIZE as u32,
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
