//! Lazily-populated, memory-mappable file descriptors over FUSE.
//!
//! A producer in this process publishes memory contents incrementally
//! into a buffer; a consumer process receives a file descriptor, maps it
//! with ordinary `mmap`, and observes the contents as they become
//! available. Faulting pages block until the producer supplies them.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: Manager (mount lifecycle, descriptor creation)
//! Layer 2: Filesystem (fuser::Filesystem over registered buffers)
//! Layer 1: Buffers (linear bitmap / sparse frame disciplines)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lazyfd_vfs::{Manager, ManagerOptions, OpenMode, SparseBuffer};
//!
//! # fn main() -> Result<(), lazyfd_vfs::Error> {
//! let manager = Manager::new(ManagerOptions::default())?;
//!
//! let buffer = Arc::new(SparseBuffer::new());
//! let fd = manager.create_temporal(4096, OpenMode::ReadOnly, Arc::clone(&buffer))?;
//!
//! // Hand `fd` to the consumer, then publish:
//! buffer.produce_frame(vec![0u8; 4096], 0);
//! buffer.production_finished();
//! # Ok(())
//! # }
//! ```

mod adapter;
mod error;
mod filesystem;
mod manager;
mod options;

pub use error::Error;
pub use manager::Manager;
pub use options::{ManagerOptions, OpenMode};

// Re-export the buffer surface so callers depend on one crate.
pub use lazyfd_buffers::{BufferError, Frame, LinearBuffer, SparseBuffer, BLOCK_SIZE};
