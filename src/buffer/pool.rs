//! Buffer pool implementation
//!
//! Free list of `BytesMut` behind a Mutex, with a Condvar to park readers
//! while every buffer is leased.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, VolumeError};

/// Pool of block-sized byte buffers
///
/// ## Concurrency:
/// - `state`: free list and lease count, protected by one Mutex
/// - `released`: signalled whenever a lease ends
/// - Buffers are allocated lazily, up to `max_buffers`
pub struct BufferPool {
    /// Capacity of every buffer (the maximum block size)
    buffer_size: usize,

    /// Max buffers leased at the same time
    max_buffers: usize,

    state: Mutex<PoolState>,

    released: Condvar,
}

struct PoolState {
    /// Buffers returned by previous holders, ready for reuse
    free: Vec<BytesMut>,

    /// Buffers currently held by callers
    leased: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            buffer_size,
            max_buffers,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                leased: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Lease a buffer of exactly `len` zeroed bytes.
    ///
    /// Blocks while `max_buffers` leases are outstanding.
    pub fn get(self: &Arc<Self>, len: usize) -> Result<PooledBuffer> {
        self.check_len(len)?;

        let mut state = self.state.lock();
        while state.leased >= self.max_buffers {
            self.released.wait(&mut state);
        }
        let buf = self.lease(&mut state, len);
        drop(state);

        Ok(self.wrap(buf))
    }

    /// Lease a buffer without waiting. `Ok(None)` when the pool is exhausted.
    pub fn try_get(self: &Arc<Self>, len: usize) -> Result<Option<PooledBuffer>> {
        self.check_len(len)?;

        let mut state = self.state.lock();
        if state.leased >= self.max_buffers {
            return Ok(None);
        }
        let buf = self.lease(&mut state, len);
        drop(state);

        Ok(Some(self.wrap(buf)))
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Buffers currently held by callers
    pub fn leased(&self) -> usize {
        self.state.lock().leased
    }

    /// Leases that can be granted without waiting
    pub fn available(&self) -> usize {
        self.max_buffers.saturating_sub(self.leased())
    }

    /// Buffers allocated and sitting on the free list
    pub fn idle(&self) -> usize {
        self.state.lock().free.len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.buffer_size {
            return Err(VolumeError::TooLarge {
                size: len,
                max: self.buffer_size,
            });
        }
        Ok(())
    }

    /// Called with the state lock held and a lease slot available
    fn lease(&self, state: &mut PoolState, len: usize) -> BytesMut {
        state.leased += 1;
        let mut buf = state
            .free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    fn wrap(self: &Arc<Self>, buf: BytesMut) -> PooledBuffer {
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, buf: BytesMut) {
        let mut state = self.state.lock();
        state.leased = state.leased.saturating_sub(1);
        // A buffer whose storage got reallocated is not worth keeping
        if buf.capacity() >= self.buffer_size {
            state.free.push(buf);
        }
        drop(state);
        self.released.notify_one();
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("max_buffers", &self.max_buffers)
            .field("leased", &self.leased())
            .finish()
    }
}

/// Exclusively owned lease on a pooled buffer.
///
/// Not `Clone`. Dropping it, or calling [`PooledBuffer::release`], returns the
/// storage to the pool; after that the bytes are unreachable.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Return the buffer to its pool
    pub fn release(self) {
        drop(self);
    }

    /// Shrink the visible length (e.g. after a short read)
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl PartialEq<[u8]> for PooledBuffer {
    fn eq(&self, other: &[u8]) -> bool {
        self.deref() == other
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer").field("len", &self.len()).finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}
