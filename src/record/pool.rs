//! Lock-free record pools.
//!
//! High-frequency records are recycled instead of reallocated:
//! - `acquire` pops a cleared record from a lock-free free list
//! - dropping the [`Pooled`] guard (or [`RecordPool::release`]) clears it
//!   and pushes it back
//! - buffers inside a record keep their capacity across reuse

use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A record that can be recycled through a [`RecordPool`].
pub trait Poolable: Default + Send + 'static {
    /// Return every field to its zero value.
    ///
    /// Vectors must be truncated, not reallocated, so their capacity is
    /// reused by the next owner.
    fn reset(&mut self);
}

struct PoolInner<T> {
    free: ArrayQueue<Box<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    discards: AtomicU64,
}

/// Statistics for pool performance monitoring
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub discards: u64,
    pub available: usize,
    pub capacity: usize,
}

/// Concurrent free list of records of one type.
///
/// Cloning the pool is cheap; all clones share one free list.
pub struct RecordPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for RecordPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> RecordPool<T> {
    /// Create an empty pool holding at most `capacity` idle records.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: ArrayQueue::new(capacity.max(1)),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                returns: AtomicU64::new(0),
                discards: AtomicU64::new(0),
            }),
        }
    }

    /// Pre-allocate up to `count` idle records.
    pub fn warm_up(&self, count: usize) {
        for _ in 0..count {
            if self.inner.free.push(Box::default()).is_err() {
                break;
            }
        }
    }

    /// Take a zero-valued record, allocating only when the free list is empty.
    #[inline]
    pub fn acquire(&self) -> Pooled<T> {
        let record = match self.inner.free.pop() {
            Some(record) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                record
            },
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                Box::default()
            },
        };

        Pooled {
            record: Some(record),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Return a record to the pool. Equivalent to dropping it.
    #[inline]
    pub fn release(&self, record: Pooled<T>) {
        drop(record);
    }

    /// Get current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            returns: self.inner.returns.load(Ordering::Relaxed),
            discards: self.inner.discards.load(Ordering::Relaxed),
            available: self.inner.free.len(),
            capacity: self.inner.free.capacity(),
        }
    }
}

/// A record on loan from a [`RecordPool`].
///
/// The record is cleared and returned to its pool when the guard drops,
/// so no reference to it can outlive the release.
pub struct Pooled<T: Poolable> {
    record: Option<Box<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Poolable> Pooled<T> {
    /// Detach the record from its pool; it is freed normally when dropped.
    pub fn into_inner(mut self) -> T {
        match self.record.take() {
            Some(record) => *record,
            None => T::default(),
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.reset();
            if self.pool.free.push(record).is_ok() {
                self.pool.returns.fetch_add(1, Ordering::Relaxed);
            } else {
                self.pool.discards.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        // only `into_inner` and `drop` take the record, and both consume the guard
        self.record.as_deref().expect("pooled record present until drop")
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        self.record.as_deref_mut().expect("pooled record present until drop")
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => record.fmt(f),
            None => f.write_str("Pooled(<released>)"),
        }
    }
}

impl<T: Poolable + serde::Serialize> serde::Serialize for Pooled<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (**self).serialize(serializer)
    }
}
