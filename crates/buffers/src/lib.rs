//! Producer/consumer buffer disciplines backing lazyfd file descriptors.
//!
//! Two disciplines are provided:
//! - [`linear::LinearBuffer`]: pre-allocated backing storage with a
//!   block-presence bitmap. Backs shared (read-write) and cloned
//!   (read-only) descriptors.
//! - [`sparse::SparseBuffer`]: an ordered frame list at arbitrary
//!   offsets. Reads consume; each byte is delivered at most once. Backs
//!   temporal descriptors.
//!
//! Both block the reader until the producer supplies the requested range
//! or declares production finished. Wake-ups are broadcast: concurrent
//! readers wait on disjoint ranges and each re-checks its own predicate.

pub mod linear;
pub mod sparse;

pub use lazyfd_common::{BufferError, BLOCK_SIZE};
pub use linear::LinearBuffer;
pub use sparse::{Frame, SparseBuffer};
