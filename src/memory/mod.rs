//! Bounded pool of fixed-size buffers.
//!
//! All record I/O on a node runs through one shared pool. The pool is the
//! backpressure mechanism: `alloc` blocks while every buffer is outstanding,
//! so a fast producer stalls until a consumer drains and releases.
//!
//! Ownership of a buffer is a move, never a shared pointer. It passes
//! pool -> writer -> transport -> consumer and returns to the pool only
//! through [`BufferPool::release`], so a released buffer cannot be read.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Buffer pool failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// Bounded wait for a free buffer ran out. Retryable.
    #[error("no buffer became free within {0:?}")]
    AllocTimeout(Duration),

    /// The pool was shut down while the caller was blocked.
    #[error("buffer pool shut down")]
    Interrupted,

    /// Released buffer does not belong to this pool.
    #[error("released buffer of size {got}, pool buffer size is {expected}")]
    ForeignBuffer { got: usize, expected: usize },
}

/// A fixed-length byte region with read/write cursors.
///
/// Exactly one logical owner at any instant; hand-off is a move.
#[derive(Debug, PartialEq)]
pub struct Buffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total region size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written and not yet read.
    #[inline]
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes of remaining write space.
    #[inline]
    pub fn writable(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Append as many bytes of `src` as fit; returns the count copied.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.writable());
        self.data[self.write_pos..self.write_pos + n].copy_from_slice(&src[..n]);
        self.write_pos += n;
        n
    }

    /// Copy up to `dst.len()` unread bytes into `dst`; returns the count.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.readable());
        dst[..n].copy_from_slice(&self.data[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        n
    }

    /// The unread region.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Zero the region and rewind both cursors.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.read_pos = 0;
        self.write_pos = 0;
    }
}

struct PoolState {
    free: Vec<Buffer>,
    outstanding: usize,
    shutdown: bool,
}

/// Bounded set of fixed-size buffers shared by all tasks on one node.
///
/// One mutex/condvar pair guards the free set; `release` wakes one blocked
/// allocator. The outstanding count never exceeds `capacity`.
pub struct BufferPool {
    state: Mutex<PoolState>,
    freed: Condvar,
    buffer_size: usize,
    capacity: usize,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each.
    ///
    /// Regions are created lazily on first allocation, not up front.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be non-zero");
        assert!(capacity > 0, "capacity must be non-zero");
        Self {
            state: Mutex::new(PoolState {
                free: Vec::with_capacity(capacity),
                outstanding: 0,
                shutdown: false,
            }),
            freed: Condvar::new(),
            buffer_size,
            capacity,
        }
    }

    /// Size of every buffer handed out by this pool.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of simultaneously outstanding buffers.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Blocking allocation of one zero-initialized buffer.
    ///
    /// Blocks while outstanding == capacity. Returns
    /// [`MemoryError::Interrupted`] if the pool is shut down while waiting.
    pub fn alloc(&self) -> Result<Buffer, MemoryError> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(MemoryError::Interrupted);
            }
            if let Some(buffer) = Self::take_free(&mut state, self.buffer_size, self.capacity) {
                return Ok(buffer);
            }
            debug!(outstanding = state.outstanding, "buffer pool exhausted, waiting");
            self.freed.wait(&mut state);
        }
    }

    /// Non-blocking allocation.
    pub fn try_alloc(&self) -> Option<Buffer> {
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        Self::take_free(&mut state, self.buffer_size, self.capacity)
    }

    /// Bounded-wait allocation; surfaces exhaustion as a retryable timeout.
    pub fn alloc_timeout(&self, timeout: Duration) -> Result<Buffer, MemoryError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(MemoryError::Interrupted);
            }
            if let Some(buffer) = Self::take_free(&mut state, self.buffer_size, self.capacity) {
                return Ok(buffer);
            }
            if self.freed.wait_until(&mut state, deadline).timed_out() {
                return Err(MemoryError::AllocTimeout(timeout));
            }
        }
    }

    /// Return a buffer to the free set and wake one blocked allocator.
    pub fn release(&self, mut buffer: Buffer) -> Result<(), MemoryError> {
        if buffer.capacity() != self.buffer_size {
            return Err(MemoryError::ForeignBuffer {
                got: buffer.capacity(),
                expected: self.buffer_size,
            });
        }
        buffer.reset();
        let mut state = self.state.lock();
        if state.outstanding == 0 {
            return Err(MemoryError::ForeignBuffer {
                got: buffer.capacity(),
                expected: self.buffer_size,
            });
        }
        state.outstanding -= 1;
        state.free.push(buffer);
        drop(state);
        self.freed.notify_one();
        Ok(())
    }

    /// Wake every blocked allocator with [`MemoryError::Interrupted`].
    ///
    /// Called on node teardown; outstanding buffers stay with their owners.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.freed.notify_all();
    }

    fn take_free(state: &mut PoolState, buffer_size: usize, capacity: usize) -> Option<Buffer> {
        if let Some(buffer) = state.free.pop() {
            state.outstanding += 1;
            return Some(buffer);
        }
        if state.outstanding < capacity {
            state.outstanding += 1;
            return Some(Buffer::new(buffer_size));
        }
        None
    }
}

#[cfg(test)]
mod tests;
