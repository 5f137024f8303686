//! Shared error types used across lazyfd crates.

use thiserror::Error;

/// Errors surfaced by buffer read and write operations.
///
/// Filesystem operations translate these to FUSE replies: `EndOfData`
/// becomes an empty read reply, `NotSupported` becomes `ENOSYS`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// No bytes are obtainable at the requested offset and the producer
    /// has signalled that no more data will arrive.
    #[error("end of data")]
    EndOfData,

    /// The buffer kind does not support the operation (write on a
    /// cloned or temporal buffer).
    #[error("operation not supported")]
    NotSupported,
}
