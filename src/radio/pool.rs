//! # Packet Buffer Pool
//!
//! A fixed set of equally sized buffers for the owner side of the radio. The
//! pool never grows: when every buffer is out, `allocate` returns `None` and the
//! driver drops the reception, which is the behaviour the allocation callback
//! contract asks for.

use crate::radio::packet::PacketBuffer;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct PoolInner {
    free: Vec<PacketBuffer>,
    outstanding: usize,
    exhausted: u64,
}

/// Shared pool of `PacketBuffer`s; clones refer to the same pool
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
    buffer_size: usize,
    count: usize,
}

impl BufferPool {
    /// Create a pool of `count` buffers of `buffer_size` bytes each
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let free = (0..count)
            .map(|_| PacketBuffer::with_capacity(buffer_size))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free,
                outstanding: 0,
                exhausted: 0,
            })),
            buffer_size,
            count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a buffer able to hold `length` bytes
    pub fn allocate(&self, length: usize) -> Option<PacketBuffer> {
        if length > self.buffer_size {
            return None;
        }
        let mut inner = self.lock();
        match inner.free.pop() {
            Some(buffer) => {
                inner.outstanding += 1;
                Some(buffer)
            }
            None => {
                inner.exhausted += 1;
                None
            }
        }
    }

    /// Return a buffer to the pool. Buffers that do not belong to a pool of this
    /// size are discarded.
    pub fn recycle(&self, mut buffer: PacketBuffer) {
        let mut inner = self.lock();
        if buffer.capacity() != self.buffer_size || inner.outstanding == 0 {
            return;
        }
        buffer.clear();
        inner.free.push(buffer);
        inner.outstanding -= 1;
    }

    /// Buffers currently handed out
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Number of allocations refused because the pool was empty
    pub fn exhausted_count(&self) -> u64 {
        self.lock().exhausted
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
