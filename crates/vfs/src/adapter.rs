//! Uniform view of a buffer as read / write / close, with per-kind
//! write and close policy.

use std::sync::Arc;

use lazyfd_common::BufferError;
use lazyfd_buffers::{LinearBuffer, SparseBuffer};

/// Adapter presented to the filesystem for a registered buffer.
///
/// Carries the logical size (sparse buffers do not know theirs) and the
/// kind-specific policy:
///
/// | kind     | write_at        | close        |
/// |----------|-----------------|--------------|
/// | shared   | linear write    | close signal |
/// | cloned   | `NotSupported`  | close signal |
/// | temporal | `NotSupported`  | no-op        |
pub(crate) struct BufferAdapter {
    size: u64,
    kind: BufferKind,
}

enum BufferKind {
    /// Readable and writable; kernel write-back lands in backing storage.
    Shared(Arc<LinearBuffer>),
    /// Readable only; the kernel may map multiple private views.
    Cloned(Arc<LinearBuffer>),
    /// Readable once per byte range; lifetime owned by the producer.
    Temporal(Arc<SparseBuffer>),
}

impl BufferAdapter {
    pub fn shared(size: u64, buffer: Arc<LinearBuffer>) -> Self {
        Self {
            size,
            kind: BufferKind::Shared(buffer),
        }
    }

    pub fn cloned(size: u64, buffer: Arc<LinearBuffer>) -> Self {
        Self {
            size,
            kind: BufferKind::Cloned(buffer),
        }
    }

    pub fn temporal(size: u64, buffer: Arc<SparseBuffer>) -> Self {
        Self {
            size,
            kind: BufferKind::Temporal(buffer),
        }
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Blocking read; see the concrete buffer disciplines.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize, BufferError> {
        match &self.kind {
            BufferKind::Shared(buffer) | BufferKind::Cloned(buffer) => buffer.read_at(dst, offset),
            BufferKind::Temporal(buffer) => buffer.read_at(dst, offset),
        }
    }

    /// Write-back from the kernel. Only shared buffers accept it.
    pub fn write_at(&self, src: &[u8], offset: u64) -> Result<usize, BufferError> {
        match &self.kind {
            BufferKind::Shared(buffer) => Ok(buffer.write_at(src, offset)),
            BufferKind::Cloned(_) | BufferKind::Temporal(_) => Err(BufferError::NotSupported),
        }
    }

    /// Invoked when the kernel releases the last handle.
    pub fn close(&self) {
        match &self.kind {
            BufferKind::Shared(buffer) | BufferKind::Cloned(buffer) => buffer.close(),
            // The producing code owns a temporal buffer's lifetime.
            BufferKind::Temporal(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_policy() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; 64]));
        let adapter = BufferAdapter::shared(64, Arc::clone(&buffer));

        assert_eq!(adapter.size(), 64);
        assert_eq!(adapter.write_at(&[1, 2, 3], 0), Ok(3));
        assert_eq!(&buffer.bytes()[..3], &[1, 2, 3]);

        adapter.close();
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_cloned_rejects_writes_but_closes() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; 64]));
        let adapter = BufferAdapter::cloned(64, Arc::clone(&buffer));

        assert_eq!(adapter.write_at(&[1], 0), Err(BufferError::NotSupported));
        adapter.close();
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_temporal_rejects_writes_close_is_noop() {
        let buffer = Arc::new(SparseBuffer::new());
        let adapter = BufferAdapter::temporal(128, Arc::clone(&buffer));

        assert_eq!(adapter.write_at(&[1], 0), Err(BufferError::NotSupported));
        adapter.close();

        // The buffer keeps working after close: lifetime is the producer's.
        buffer.produce_frame(vec![9; 8], 0);
        let mut out = [0u8; 8];
        assert_eq!(adapter.read_at(&mut out, 0), Ok(8));
        assert_eq!(out, [9u8; 8]);
    }

    #[test]
    fn test_read_dispatches_to_linear() {
        let buffer = Arc::new(LinearBuffer::new(vec![3u8; 32]));
        buffer.blocks_populated(0, 1);
        let adapter = BufferAdapter::cloned(32, buffer);

        let mut out = [0u8; 32];
        assert_eq!(adapter.read_at(&mut out, 0), Ok(32));
        assert_eq!(out, [3u8; 32]);
    }
}
