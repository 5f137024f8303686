//! Sparse buffer: an ordered frame list consumed by reads.
//!
//! The producer supplies frames at arbitrary offsets; reads deliver the
//! covered bytes and destructively remove them from the buffer. Each byte
//! is delivered at most once: the backing data for a temporal descriptor
//! only survives in the kernel page cache of the consumer's mapping.

use std::sync::{Condvar, Mutex};

use lazyfd_common::BufferError;

/// A contiguous run of produced bytes at a fixed offset.
#[derive(Debug)]
pub struct Frame {
    /// Byte offset of the first byte of `data` within the buffer.
    pub offset: u64,
    /// The frame contents. Ownership belongs to the buffer once produced.
    pub data: Vec<u8>,
}

/// At-most-once buffer of frames at arbitrary offsets.
///
/// Frames are kept strictly sorted by offset and pairwise non-overlapping.
/// Reads consume: depending on how a read intersects a frame, the frame is
/// removed whole, trimmed at the head, truncated at the tail, or split in
/// two with the unread tail re-inserted.
///
/// # Example
///
/// ```
/// use lazyfd_buffers::SparseBuffer;
///
/// let buffer = SparseBuffer::new();
/// buffer.produce_frame(vec![4, 5, 6, 7], 4);
/// buffer.produce_frame(vec![0, 1, 2, 3], 0);
/// buffer.production_finished();
///
/// let mut out = [0u8; 8];
/// assert_eq!(buffer.read_at(&mut out, 0), Ok(8));
/// assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7]);
/// ```
#[derive(Debug, Default)]
pub struct SparseBuffer {
    state: Mutex<SparseState>,
    /// Signalled (broadcast) on every produced frame and at finish.
    produced: Condvar,
}

#[derive(Debug, Default)]
struct SparseState {
    /// Sorted by offset, non-overlapping.
    frames: Vec<Frame>,
    finished: bool,
}

impl SparseBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy bytes out of the buffer, consuming them.
    ///
    /// Iterates until `dst` is full or no more data is obtainable,
    /// waiting on the producer whenever the next byte has not been
    /// produced yet. Once production has finished, returns what was
    /// copied so far, or [`BufferError::EndOfData`] when that is nothing.
    ///
    /// A zero-length read returns `Ok(0)` without blocking.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> Result<usize, BufferError> {
        let mut offset: u64 = offset;
        let mut copied: usize = 0;

        let mut state = self.state.lock().unwrap();

        while copied < dst.len() {
            let chunk: Vec<u8> = loop {
                if let Some(chunk) = take_slice(&mut state, offset, dst.len() - copied) {
                    break chunk;
                }
                if state.finished {
                    return if copied > 0 {
                        Ok(copied)
                    } else {
                        Err(BufferError::EndOfData)
                    };
                }
                state = self.produced.wait(state).unwrap();
            };

            dst[copied..copied + chunk.len()].copy_from_slice(&chunk);
            offset += chunk.len() as u64;
            copied += chunk.len();
        }

        Ok(copied)
    }

    /// Insert a frame, transferring ownership of `data` to the buffer.
    ///
    /// Frames may arrive in any order; the sorted position is found by
    /// binary search. Producing a frame that overlaps an existing one is
    /// a caller error with undefined read behavior (asserted in debug
    /// builds). Wakes all waiting readers.
    pub fn produce_frame(&self, data: Vec<u8>, offset: u64) {
        let mut state = self.state.lock().unwrap();
        let i: usize = state.frames.partition_point(|f| f.offset < offset);

        debug_assert!(
            i == 0 || state.frames[i - 1].offset + state.frames[i - 1].data.len() as u64 <= offset,
            "frame at {offset} overlaps its predecessor"
        );
        debug_assert!(
            i == state.frames.len() || offset + data.len() as u64 <= state.frames[i].offset,
            "frame at {offset} overlaps its successor"
        );

        state.frames.insert(i, Frame { offset, data });
        drop(state);

        self.produced.notify_all();
    }

    /// Declare that no more frames will be produced, either because all
    /// have been produced or due to cancellation or error upstream.
    /// Releases every waiting reader.
    pub fn production_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.finished = true;
        drop(state);

        self.produced.notify_all();
    }

    /// Produce every frame of an iterator, then finish production.
    ///
    /// The producer-loop helper: drain a frame source into the buffer and
    /// release readers when it runs dry.
    pub fn feed<I>(&self, frames: I)
    where
        I: IntoIterator<Item = Frame>,
    {
        for frame in frames {
            self.produce_frame(frame.data, frame.offset);
        }
        self.production_finished();
    }
}

/// Find the frame covering `offset` and splice out up to `max` bytes.
///
/// Binary search yields the first frame at-or-after `offset`; that frame
/// covers the offset only on an exact match, otherwise the predecessor
/// may cover it. Returns `None` when no frame covers the offset.
fn take_slice(state: &mut SparseState, offset: u64, max: usize) -> Option<Vec<u8>> {
    let i: usize = state.frames.partition_point(|f| f.offset < offset);

    if let Some(frame) = state.frames.get(i) {
        if frame.offset == offset {
            return Some(splice(state, i, 0, max));
        }
    }
    if i > 0 {
        let frame = &state.frames[i - 1];
        let o: usize = (offset - frame.offset) as usize;
        if o < frame.data.len() {
            return Some(splice(state, i - 1, o, max));
        }
    }

    None
}

/// Remove up to `max` bytes starting at intra-frame offset `o` from frame
/// `i`, restoring the sorted non-overlapping frame list around the hole.
fn splice(state: &mut SparseState, i: usize, o: usize, max: usize) -> Vec<u8> {
    let frame = &mut state.frames[i];
    let take: usize = (frame.data.len() - o).min(max);

    if o == 0 {
        if take == frame.data.len() {
            // remove the whole frame
            state.frames.remove(i).data
        } else {
            // trim the head off the frame
            let rest: Vec<u8> = frame.data.split_off(take);
            frame.offset += take as u64;
            std::mem::replace(&mut frame.data, rest)
        }
    } else if o + take == frame.data.len() {
        // truncate the tail off the frame
        frame.data.split_off(o)
    } else {
        // carve out the middle: keep the head in place, re-insert the
        // unread tail right after it
        let tail: Vec<u8> = frame.data.split_off(o + take);
        let out: Vec<u8> = frame.data.split_off(o);
        let tail_offset: u64 = frame.offset + (o + take) as u64;

        state.frames.insert(
            i + 1,
            Frame {
                offset: tail_offset,
                data: tail,
            },
        );
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
