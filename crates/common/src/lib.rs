//! Shared types and constants for the lazyfd crates.
//!
//! This crate provides the pieces used on both sides of the
//! producer/consumer boundary:
//! - Size constants shared by the buffers and the filesystem adapter
//! - The buffer error type surfaced through filesystem operations

pub mod constants;
pub mod error;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::BufferError;
