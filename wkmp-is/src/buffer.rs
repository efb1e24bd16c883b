//! Byte ring buffer between the I/O thread and the reading thread
//!
//! `InputBuffer` is not synchronized on its own: it lives inside the stream's
//! state mutex, and every mutation happens with that lock held. It therefore
//! uses a plain `HeapRb` instead of split producer/consumer halves.
//!
//! ## Design
//!
//! ```text
//! Source (I/O thread) → append() / write_region() + commit_region()
//!                                   ↓
//!                             InputBuffer
//!                             - Capacity: fixed at construction
//!                             - Occupancy: 0 ..= capacity
//!                                   ↓
//!                              read_into()
//!                                   ↓
//!                           Reader (consumer thread)
//! ```
//!
//! The write region is the ring's own storage: the contiguous free run
//! starting at the write position. The producer fills any prefix of it and
//! commits that many bytes, so sources can read straight from a socket or
//! file into the ring. When the free space wraps around the end of the ring
//! the region is shorter than `space()`; commit and prepare again.
//!
//! The ring is filled once at construction so every slot holds an
//! initialized byte. `u8` slots are never dropped, so they stay initialized
//! for the buffer's lifetime and can be handed out as `&mut [u8]`.

use ringbuf::{traits::*, HeapRb};
use std::mem::MaybeUninit;

/// Fixed-capacity byte FIFO
pub struct InputBuffer {
    ring: HeapRb<u8>,

    /// Length of the currently prepared write region
    prepared: usize,

    /// Total bytes written since creation (monotonic)
    total_written: u64,

    /// Total bytes handed to readers since creation (monotonic)
    total_read: u64,
}

impl std::fmt::Debug for InputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBuffer")
            .field("capacity", &self.capacity())
            .field("occupied", &self.len())
            .field("fill_percent", &self.fill_percent())
            .field("total_written", &self.total_written)
            .field("total_read", &self.total_read)
            .finish()
    }
}

impl InputBuffer {
    /// Create an empty buffer
    ///
    /// `capacity` must be non-zero (checked by stream configuration).
    pub fn new(capacity: usize) -> Self {
        let mut ring = HeapRb::new(capacity);
        ring.push_iter(std::iter::repeat(0u8).take(capacity));
        ring.skip(capacity);

        Self {
            ring,
            prepared: 0,
            total_written: 0,
            total_read: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Free space in bytes
    pub fn space(&self) -> usize {
        self.ring.vacant_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Fill percentage in range [0.0, 100.0]
    pub fn fill_percent(&self) -> f32 {
        (self.len() as f32 / self.capacity() as f32) * 100.0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Append as much of `data` as fits
    ///
    /// # Returns
    /// Number of bytes stored (less than `data.len()` only if the buffer filled up)
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = self.ring.push_slice(data);
        self.total_written += n as u64;
        n
    }

    /// Prepare the contiguous free run at the write position
    ///
    /// Returns its length, which is `space()` unless the free space wraps.
    /// Call [`InputBuffer::write_region`] to access it and
    /// [`InputBuffer::commit_region`] to publish a prefix of it.
    pub fn prepare_region(&mut self) -> usize {
        self.prepared = self.ring.vacant_slices().0.len();
        self.prepared
    }

    pub fn write_region(&mut self) -> &mut [u8] {
        let prepared = self.prepared;
        let (head, _) = self.ring.vacant_slices_mut();
        let len = prepared.min(head.len());
        // SAFETY: every slot was written in `new` and the ring never
        // de-initializes `u8` slots.
        unsafe { &mut *(&mut head[..len] as *mut [MaybeUninit<u8>] as *mut [u8]) }
    }

    pub fn region(&self) -> &[u8] {
        let (head, _) = self.ring.vacant_slices();
        let len = self.prepared.min(head.len());
        // SAFETY: as in `write_region`
        unsafe { &*(&head[..len] as *const [MaybeUninit<u8>] as *const [u8]) }
    }

    /// Publish the first `nbytes` of the prepared region
    ///
    /// Caller guarantees `nbytes` does not exceed the prepared length.
    pub fn commit_region(&mut self, nbytes: usize) -> usize {
        debug_assert!(nbytes <= self.prepared);
        let n = nbytes.min(self.prepared).min(self.space());
        // SAFETY: the first `n` vacant slots are initialized (see `new`) and
        // hold the bytes the producer wrote through `write_region`.
        unsafe { self.ring.advance_write_index(n) };
        self.prepared = 0;
        self.total_written += n as u64;
        n
    }

    /// Move up to `out.len()` bytes from the front of the buffer
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.ring.pop_slice(out);
        self.total_read += n as u64;
        n
    }

    /// Drop everything buffered (does not count as read)
    ///
    /// # Returns
    /// Number of bytes discarded
    pub fn clear(&mut self) -> usize {
        self.prepared = 0;
        let occupied = self.len();
        self.ring.skip(occupied)
    }
}
