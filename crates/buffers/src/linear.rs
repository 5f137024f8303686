//! Linear buffer: pre-sized backing storage with a block-presence bitmap.
//!
//! The producer fills ranges of the backing storage (directly through
//! [`LinearBuffer::bytes`] or with [`LinearBuffer::write_at`]) and then
//! marks the covered blocks populated. Consumer reads block until every
//! block spanning the requested range is present, or until the producer
//! declares population finished.
//!
//! A block must be fully written to storage *before* its bit is set;
//! the bitmap is the only synchronization between the two sides.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

use lazyfd_common::{BufferError, BLOCK_SIZE};

/// Lazily-populated buffer over caller-allocated backing storage.
///
/// Readable and writable at arbitrary offsets; writes land directly in
/// the backing storage and do not touch the bitmap (they record the
/// consumer's modifications, not producer data). Backs both shared and
/// cloned descriptors.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lazyfd_buffers::{LinearBuffer, BLOCK_SIZE};
///
/// let buffer = Arc::new(LinearBuffer::new(vec![7u8; 2 * BLOCK_SIZE]));
/// buffer.blocks_populated(0, 2);
/// buffer.population_finished();
///
/// let mut out = [0u8; 16];
/// let n = buffer.read_at(&mut out, BLOCK_SIZE as u64).unwrap();
/// assert_eq!(&out[..n], &[7u8; 16]);
/// ```
pub struct LinearBuffer {
    /// Logical size in bytes, fixed at creation.
    len: usize,
    /// Number of presence-tracked blocks (`ceil(len / BLOCK_SIZE)`).
    blocks: usize,
    /// Backing storage. Locked only for the duration of a copy.
    storage: Mutex<Box<[u8]>>,
    /// Presence bitmap and the finished flag.
    state: Mutex<Population>,
    /// Signalled (broadcast) on every population change.
    populated: Condvar,
    /// One-shot close signal, raised when the kernel releases the last
    /// handle on the descriptor.
    close_flag: Mutex<bool>,
    close_cond: Condvar,
}

/// Population state: one bit per block, packed into 64-bit words.
struct Population {
    bitmap: Vec<u64>,
    finished: bool,
}

impl Population {
    /// Check that every block in `[begin, end)` is present.
    fn contains(&self, begin: usize, end: usize) -> bool {
        (begin..end).all(|i| self.bitmap[i / 64] & (1 << (i % 64)) != 0)
    }

    fn set(&mut self, index: usize) {
        self.bitmap[index / 64] |= 1 << (index % 64);
    }
}

/// Locked view of a linear buffer's backing storage.
///
/// Holding the guard blocks concurrent copies in and out of the buffer,
/// so keep it short-lived.
pub struct StorageGuard<'a>(MutexGuard<'a, Box<[u8]>>);

impl Deref for StorageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for StorageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl LinearBuffer {
    /// Create a buffer over pre-allocated backing storage.
    ///
    /// The bitmap is sized to `ceil(storage.len() / BLOCK_SIZE)` bits;
    /// all blocks start absent.
    pub fn new(storage: Vec<u8>) -> Self {
        let len: usize = storage.len();
        let blocks: usize = (len + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let words: usize = (blocks + 63) / 64;

        Self {
            len,
            blocks,
            storage: Mutex::new(storage.into_boxed_slice()),
            state: Mutex::new(Population {
                bitmap: vec![0; words],
                finished: false,
            }),
            populated: Condvar::new(),
            close_flag: Mutex::new(false),
            close_cond: Condvar::new(),
        }
    }

    /// Logical size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of presence-tracked blocks.
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Locked view of the backing storage.
    ///
    /// The producer writes block contents through this view (or with
    /// [`write_at`](Self::write_at)) before marking them populated, and
    /// reads write-back results out of it after the close signal.
    pub fn bytes(&self) -> StorageGuard<'_> {
        StorageGuard(self.storage.lock().unwrap())
    }

    /// Copy bytes out of the buffer, blocking until they are available.
    ///
    /// Blocks until every block spanning `[offset, offset + dst.len())`
    /// is populated or the producer finishes. The low end of the block
    /// range is rounded *up*: a read that starts inside a still-absent
    /// block but only consumes its tail proceeds without waiting for it.
    ///
    /// Returns the number of bytes copied, trimmed to the buffer tail.
    /// Zero-length (or fully trimmed) reads return `Ok(0)` without
    /// blocking. Returns [`BufferError::EndOfData`] when population
    /// finished with a required block still absent.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize, BufferError> {
        let avail: u64 = (self.len as u64).saturating_sub(offset);
        let want: usize = (dst.len() as u64).min(avail) as usize;
        if want == 0 {
            return Ok(0);
        }

        let block: u64 = BLOCK_SIZE as u64;
        let begin: usize = ((offset + block - 1) / block) as usize;
        let end: usize = ((offset + want as u64 + block - 1) / block) as usize;

        if !self.wait_for_blocks(begin, end) {
            return Err(BufferError::EndOfData);
        }

        let storage = self.storage.lock().unwrap();
        let offset = offset as usize;
        dst[..want].copy_from_slice(&storage[offset..offset + want]);
        Ok(want)
    }

    /// Wait until blocks `[begin, end)` are all present. Returns false
    /// when population finished first.
    fn wait_for_blocks(&self, begin: usize, end: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.contains(begin, end) {
                return true;
            }
            if state.finished {
                return false;
            }
            state = self.populated.wait(state).unwrap();
        }
    }

    /// Copy bytes into the backing storage, trimmed to the buffer tail.
    ///
    /// Never blocks and never touches the bitmap: the caller's contract
    /// is that a range is only written after at least one read of it has
    /// occurred (write-back), or before its blocks are marked populated
    /// (producer fill). Returns the number of bytes written.
    pub fn write_at(&self, src: &[u8], offset: u64) -> usize {
        let avail: u64 = (self.len as u64).saturating_sub(offset);
        let n: usize = (src.len() as u64).min(avail) as usize;
        if n > 0 {
            let mut storage = self.storage.lock().unwrap();
            let offset = offset as usize;
            storage[offset..offset + n].copy_from_slice(&src[..n]);
        }
        n
    }

    /// Mark one block as available for reading, waking all waiters.
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    pub fn block_populated(&self, index: usize) {
        assert!(
            index < self.blocks,
            "block index {index} out of range ({} blocks)",
            self.blocks
        );

        let mut state = self.state.lock().unwrap();
        state.set(index);
        drop(state);

        self.populated.notify_all();
    }

    /// Mark `count` adjacent blocks starting at `index` as available,
    /// with a single broadcast.
    ///
    /// # Panics
    /// Panics when the range exceeds the block count.
    pub fn blocks_populated(&self, index: usize, count: usize) {
        let end: usize = index
            .checked_add(count)
            .expect("block count overflows the block range");
        assert!(
            end <= self.blocks,
            "block range {index}..{end} out of range ({} blocks)",
            self.blocks
        );

        let mut state = self.state.lock().unwrap();
        for i in index..end {
            state.set(i);
        }
        drop(state);

        self.populated.notify_all();
    }

    /// Declare that no more blocks will become available, either because
    /// all have been populated or due to cancellation or error upstream.
    /// Releases every waiting reader.
    pub fn population_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        drop(state);

        self.populated.notify_all();
    }

    /// Raise the close signal.
    ///
    /// Invoked by the filesystem when the kernel releases the last handle
    /// on the descriptor. The signal fires once; later calls are no-ops.
    pub fn close(&self) {
        let mut closed = self.close_flag.lock().unwrap();
        if !*closed {
            *closed = true;
            self.close_cond.notify_all();
        }
    }

    /// Whether the close signal has been raised.
    pub fn is_closed(&self) -> bool {
        *self.close_flag.lock().unwrap()
    }

    /// Block until the close signal is raised.
    ///
    /// Write-back producers wait on this before harvesting consumer
    /// modifications from [`bytes`](Self::bytes).
    pub fn wait_closed(&self) {
        let mut closed = self.close_flag.lock().unwrap();
        while !*closed {
            closed = self.close_cond.wait(closed).unwrap();
        }
    }
}

impl std::fmt::Debug for LinearBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("LinearBuffer")
            .field("len", &self.len)
            .field("blocks", &self.blocks)
            .field("finished", &state.finished)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_full_population_round_trip() {
        let data: Vec<u8> = (0..3 * BLOCK_SIZE).map(|i| (i % 251) as u8).collect();
        let buffer = LinearBuffer::new(data.clone());

        buffer.blocks_populated(0, buffer.block_count());
        buffer.population_finished();

        let mut out = vec![0u8; data.len()];
        let n = buffer.read_at(&mut out, 0).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_read_blocks_until_populated() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; 2 * BLOCK_SIZE]));

        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut out = vec![0u8; BLOCK_SIZE];
                buffer.read_at(&mut out, BLOCK_SIZE as u64).map(|n| out[..n].to_vec())
            })
        };

        thread::sleep(Duration::from_millis(50));
        buffer.write_at(&[9u8; BLOCK_SIZE], BLOCK_SIZE as u64);
        buffer.block_populated(1);

        let got = reader.join().unwrap().unwrap();
        assert_eq!(got, vec![9u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_tail_read_skips_absent_leading_block() {
        // Only block 1 populated; a read starting 10 bytes before the
        // block boundary must not wait for block 0.
        let buffer = LinearBuffer::new(vec![0u8; 2 * BLOCK_SIZE]);
        buffer.write_at(&[3u8; BLOCK_SIZE], BLOCK_SIZE as u64);
        buffer.block_populated(1);

        let start = Instant::now();
        let mut out = [0u8; 20];
        let n = buffer.read_at(&mut out, (BLOCK_SIZE - 10) as u64).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(n, 20);
        assert_eq!(&out[..10], &[0u8; 10]);
        assert_eq!(&out[10..], &[3u8; 10]);
    }

    #[test]
    fn test_finish_with_gap_returns_end_of_data() {
        let buffer = LinearBuffer::new(vec![0u8; 2 * BLOCK_SIZE]);
        buffer.block_populated(0);
        buffer.population_finished();

        // Spans the absent block 1.
        let mut out = vec![0u8; 2 * BLOCK_SIZE];
        assert_eq!(buffer.read_at(&mut out, 0), Err(BufferError::EndOfData));

        // Entirely within the present block 0.
        let n = buffer.read_at(&mut out[..BLOCK_SIZE], 0).unwrap();
        assert_eq!(n, BLOCK_SIZE);
    }

    #[test]
    fn test_pending_read_released_by_finish() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; BLOCK_SIZE]));

        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut out = [0u8; 64];
                buffer.read_at(&mut out, 0)
            })
        };

        thread::sleep(Duration::from_millis(50));
        buffer.population_finished();

        assert_eq!(reader.join().unwrap(), Err(BufferError::EndOfData));
    }

    #[test]
    fn test_zero_length_read_never_blocks() {
        let buffer = LinearBuffer::new(vec![0u8; BLOCK_SIZE]);
        let mut out: [u8; 0] = [];
        assert_eq!(buffer.read_at(&mut out, 0), Ok(0));
    }

    #[test]
    fn test_read_trimmed_to_buffer_tail() {
        let buffer = LinearBuffer::new(vec![5u8; 100]);
        buffer.block_populated(0);

        let mut out = [0u8; 64];
        assert_eq!(buffer.read_at(&mut out, 80), Ok(20));
        assert_eq!(&out[..20], &[5u8; 20]);

        // Entirely past the end: trimmed to nothing, no blocking.
        assert_eq!(buffer.read_at(&mut out, 200), Ok(0));
    }

    #[test]
    fn test_write_at_lands_in_storage_and_trims() {
        let buffer = LinearBuffer::new(vec![0u8; 100]);

        assert_eq!(buffer.write_at(&[1, 2, 3], 10), 3);
        assert_eq!(buffer.write_at(&[7u8; 64], 90), 10);

        let bytes = buffer.bytes();
        assert_eq!(&bytes[10..13], &[1, 2, 3]);
        assert_eq!(&bytes[90..], &[7u8; 10]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_block_populated_out_of_range_panics() {
        let buffer = LinearBuffer::new(vec![0u8; BLOCK_SIZE]);
        buffer.block_populated(1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_blocks_populated_out_of_range_panics() {
        let buffer = LinearBuffer::new(vec![0u8; 2 * BLOCK_SIZE]);
        buffer.blocks_populated(1, 2);
    }

    #[test]
    fn test_broadcast_wakes_disjoint_waiters() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; 4 * BLOCK_SIZE]));

        let readers: Vec<_> = (0..4)
            .map(|i| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let mut out = vec![0u8; BLOCK_SIZE];
                    buffer.read_at(&mut out, (i * BLOCK_SIZE) as u64).map(|_| out[0])
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        for i in 0..4 {
            buffer.write_at(&[i as u8 + 1; BLOCK_SIZE], (i * BLOCK_SIZE) as u64);
        }
        buffer.blocks_populated(0, 4);

        for (i, reader) in readers.into_iter().enumerate() {
            assert_eq!(reader.join().unwrap().unwrap(), i as u8 + 1);
        }
    }

    #[test]
    fn test_close_signal_observed_by_waiter() {
        let buffer = Arc::new(LinearBuffer::new(vec![0u8; 16]));
        assert!(!buffer.is_closed());

        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.wait_closed())
        };

        thread::sleep(Duration::from_millis(20));
        buffer.close();
        waiter.join().unwrap();
        assert!(buffer.is_closed());

        // Raising again is a no-op.
        buffer.close();
        assert!(buffer.is_closed());
    }
}
