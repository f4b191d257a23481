//! Pooled byte buffers.
//!
//! Request header blocks and response bytes are assembled in [`BytesMut`]
//! buffers rented from a shared [`BufferPool`]. A [`PooledBuffer`] returns its
//! storage to the pool when dropped, so releasing a call context releases
//! every buffer it rented.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Default number of idle buffers the pool keeps.
pub const DEFAULT_MAX_POOLED: usize = 64;

/// Buffers that grew beyond this size are not returned to the pool.
pub const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// Configuration for a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Capacity of each newly allocated buffer.
    pub buffer_capacity: usize,
    /// Maximum number of idle buffers kept for reuse.
    pub max_pooled: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_pooled: DEFAULT_MAX_POOLED,
        }
    }
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers allocated by this pool over its lifetime.
    pub allocated: usize,
    /// Idle buffers waiting to be rented.
    pub available: usize,
    /// Buffers currently rented out.
    pub rented: usize,
}

struct PoolInner {
    config: BufferPoolConfig,
    buffers: Mutex<Vec<BytesMut>>,
    allocated: AtomicUsize,
    rented: AtomicUsize,
}

/// A thread-safe pool of reusable byte buffers.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool with the given configuration.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                buffers: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
                rented: AtomicUsize::new(0),
            }),
        }
    }

    /// Rents an empty buffer, reusing an idle one when available.
    pub fn rent(&self) -> PooledBuffer {
        let reused = self.inner.buffers.lock().pop();
        let buf = reused.unwrap_or_else(|| {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            BytesMut::with_capacity(self.inner.config.buffer_capacity)
        });
        self.inner.rented.fetch_add(1, Ordering::SeqCst);

        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    /// Returns the number of buffers currently rented out.
    pub fn rented(&self) -> usize {
        self.inner.rented.load(Ordering::SeqCst)
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            available: self.inner.buffers.lock().len(),
            rented: self.rented(),
        }
    }

    fn give_back(&self, mut buf: BytesMut) {
        self.inner.rented.fetch_sub(1, Ordering::SeqCst);

        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();

        let mut buffers = self.inner.buffers.lock();
        if buffers.len() < self.inner.config.max_pooled {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer rented from a [`BufferPool`]; returned to the pool on drop.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}
