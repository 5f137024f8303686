//! Shared constants used across lazyfd crates.

/// Presence-tracking granularity of a linear buffer (128 kB).
/// One bitmap bit covers one block of backing storage.
pub const BLOCK_SIZE: usize = 128 * 1024;

/// Page size assumed for filesystem statistics.
pub const PAGE_SIZE: usize = 4096;

/// Preferred I/O transfer size reported to the kernel.
pub const FS_IO_SIZE: u32 = BLOCK_SIZE as u32;

/// Filesystem name and subtype of the mount.
pub const FS_NAME: &str = "lazyfd";
