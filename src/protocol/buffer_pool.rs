//! Request buffer pool for allocation-cheap frame encoding.
//!
//! Every request is packed into a [`PooledBuffer`] taken from a
//! [`BufferPool`]. The buffer goes back to the pool when it is dropped, so it
//! is released exactly once on every path: after the writer task flushed it,
//! when packing failed half way, or when the caller's future was cancelled.
//!
//! # Design
//!
//! - A mutex-guarded free list of `BytesMut`; the lock is held only to push or
//!   pop, never across an await
//! - `acquire` never waits: an empty free list allocates a new buffer
//! - Released buffers are cleared but keep their capacity
//! - The free list is bounded (`max_idle`) and oversized buffers are dropped
//!   instead of retained (`max_retained_capacity`)
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use iproto_client::protocol::BufferPool;
//!
//! let pool = Arc::new(BufferPool::new());
//! {
//!     let mut buf = pool.acquire();
//!     buf.extend_from_slice(b"frame bytes");
//! } // released here
//! assert_eq!(pool.idle(), 1);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;

/// Default capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Buffers that grew beyond this are dropped on release.
pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

/// Pool sizing knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub buffer_capacity: usize,
    pub max_idle: usize,
    pub max_retained_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_idle: DEFAULT_MAX_IDLE,
            max_retained_capacity: DEFAULT_MAX_RETAINED_CAPACITY,
        }
    }
}

/// Counters describing pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers handed out.
    pub acquired: usize,
    /// Buffers given back (reused or dropped).
    pub released: usize,
    /// Buffers allocated because the free list was empty.
    pub allocated: usize,
}

impl PoolStats {
    /// Buffers currently checked out.
    ///
    /// A snapshot taken under concurrent use may lag; it never underflows.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.acquired.saturating_sub(self.released)
    }
}

/// A pool of reusable request buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    config: PoolConfig,
    acquired: AtomicUsize,
    released: AtomicUsize,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Create a pool with default sizing.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            config,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer from the pool, allocating if none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let buf = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            BytesMut::with_capacity(self.config.buffer_capacity)
        });
        self.acquired.fetch_add(1, Ordering::Release);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut buf: BytesMut) {
        self.released.fetch_add(1, Ordering::Release);
        if buf.capacity() > self.config.max_retained_capacity {
            return;
        }
        buf.clear();

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.config.max_idle {
            free.push(buf);
        }
    }

    /// Number of idle buffers ready for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> PoolStats {
        // every release follows its acquire, so read `released` first
        let released = self.released.load(Ordering::Acquire);
        PoolStats {
            acquired: self.acquired.load(Ordering::Acquire),
            released,
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to `BytesMut`. Returns to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Give the buffer back to the pool now.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        // only `Drop` takes the buffer out
        self.buf.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
