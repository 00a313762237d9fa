// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lock-free single-producer single-consumer ring buffer.
//!
//! Used by the streamer to hold decoded PCM bytes between its decode
//! thread (producer) and the sink's audio thread (consumer, via
//! `read`/`ok_to_read`), so decode can run a bounded distance ahead of
//! playback without either side blocking on a mutex.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A lock-free SPSC ring buffer over `T`.
///
/// The buffer has a fixed capacity and drops old data when full (the
/// writer never blocks).
pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<Option<T>>]>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    capacity: usize,
    mask: usize,
}

// SAFETY: only the writer touches write_pos/its slots, only the reader
// touches read_pos/its slots — the SPSC discipline is the caller's contract.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a new ring buffer. Capacity is rounded up to a power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        let mask = capacity - 1;

        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(UnsafeCell::new(None));
        }

        Self {
            buffer: buffer.into_boxed_slice(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn split(self) -> (RingBufferWriter<T>, RingBufferReader<T>) {
        let shared = Arc::new(self);
        (
            RingBufferWriter {
                inner: Arc::clone(&shared),
            },
            RingBufferReader { inner: shared },
        )
    }

    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    fn is_full(&self) -> bool {
        self.available() >= self.capacity
    }
}

/// Writer half. Only one should exist per buffer.
pub struct RingBufferWriter<T> {
    inner: Arc<RingBuffer<T>>,
}

impl<T> RingBufferWriter<T> {
    /// Pushes one item. If the buffer is full, the oldest item is
    /// overwritten; returns `false` in that case.
    pub fn push(&mut self, item: T) -> bool {
        let write_pos = self.inner.write_pos.load(Ordering::Relaxed);
        let read_pos = self.inner.read_pos.load(Ordering::Acquire);
        let is_full = write_pos.wrapping_sub(read_pos) >= self.inner.capacity;

        let idx = write_pos & self.inner.mask;
        // SAFETY: sole writer, writing at its own cursor.
        unsafe {
            *self.inner.buffer[idx].get() = Some(item);
        }

        self.inner
            .write_pos
            .store(write_pos.wrapping_add(1), Ordering::Release);

        if is_full {
            // The slot we just overwrote was the oldest unread one; drag
            // read_pos forward with it so the reader's next pop lands on
            // the new oldest item instead of the one we clobbered.
            self.inner
                .read_pos
                .store(read_pos.wrapping_add(1), Ordering::Release);
        }

        !is_full
    }

    /// Pushes as many items from `items` as fit without overwriting unread
    /// data, returning the count actually written.
    pub fn push_slice(&mut self, items: &[T]) -> usize
    where
        T: Clone,
    {
        let mut written = 0;
        for item in items {
            if self.inner.is_full() {
                break;
            }
            self.push(item.clone());
            written += 1;
        }
        written
    }

    pub fn available(&self) -> usize {
        self.inner.available()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

unsafe impl<T: Send> Send for RingBufferWriter<T> {}

/// Reader half. Only one should exist per buffer.
pub struct RingBufferReader<T> {
    inner: Arc<RingBuffer<T>>,
}

impl<T> RingBufferReader<T> {
    pub fn pop(&mut self) -> Option<T> {
        let read_pos = self.inner.read_pos.load(Ordering::Relaxed);
        let write_pos = self.inner.write_pos.load(Ordering::Acquire);

        if read_pos == write_pos {
            return None;
        }

        let idx = read_pos & self.inner.mask;
        // SAFETY: sole reader, writer has released this slot already.
        let item = unsafe { (*self.inner.buffer[idx].get()).take() };

        self.inner
            .read_pos
            .store(read_pos.wrapping_add(1), Ordering::Release);

        item
    }

    pub fn available(&self) -> usize {
        self.inner.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }
}

unsafe impl<T: Send> Send for RingBufferReader<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_push_pop() {
        let (mut writer, mut reader) = RingBuffer::<i32>::new(4).split();
        assert!(reader.is_empty());

        writer.push(1);
        writer.push(2);
        writer.push(3);

        assert_eq!(reader.available(), 3);
        assert_eq!(reader.pop(), Some(1));
        assert_eq!(reader.pop(), Some(2));
        assert_eq!(reader.pop(), Some(3));
        assert_eq!(reader.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let (mut writer, mut reader) = RingBuffer::<i32>::new(2).split();
        writer.push(1);
        writer.push(2);
        writer.push(3);

        assert_eq!(reader.pop(), Some(2));
        assert_eq!(reader.pop(), Some(3));
        assert_eq!(reader.pop(), None);
    }

    #[test]
    fn push_slice_stops_before_overwrite() {
        let (mut writer, reader) = RingBuffer::<u8>::new(4).split();
        let written = writer.push_slice(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(written, 4);
        assert_eq!(reader.available(), 4);
    }

    #[test]
    fn clear_drains_everything() {
        let (mut writer, mut reader) = RingBuffer::<i32>::new(8).split();
        writer.push(1);
        writer.push(2);
        reader.clear();
        assert!(reader.is_empty());
    }
}
