//! Fixed-size, reference-counted cell pools backing every message kind (§4.1).
//!
//! The original design preallocates one pool per concrete message kind and blocks
//! `Allocate` on exhaustion rather than ever failing the caller — exhaustion means
//! the pools were sized wrong, a programming error, not a runtime condition to
//! recover from. This crate realizes that with a free-list guarded by a
//! [`tokio::sync::Semaphore`]: acquiring a permit is the blocking wait, and a
//! [`Cell`]'s `Drop` returns both the value and the permit, so the pool never
//! needs a background reaper.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Point-in-time occupancy of a single pool, exported for diagnostics (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub used: usize,
    pub peak_used: usize,
}

struct Inner<T> {
    free: Mutex<VecDeque<T>>,
    semaphore: Semaphore,
    total: usize,
    used: AtomicUsize,
    peak_used: AtomicUsize,
}

/// A preallocated pool of `T` cells, sized once at construction.
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Pool<T> {
    /// Preallocates `capacity` default-constructed cells.
    ///
    /// # Panics
    /// Panics if `capacity` is zero; a zero-sized pool can never satisfy an
    /// `allocate`, which the spec treats as a sizing bug, not a runtime state.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be nonzero");
        let mut free = VecDeque::with_capacity(capacity);
        free.resize_with(capacity, T::default);
        Self {
            inner: Arc::new(Inner {
                free: Mutex::new(free),
                semaphore: Semaphore::new(capacity),
                total: capacity,
                used: AtomicUsize::new(0),
                peak_used: AtomicUsize::new(0),
            }),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Takes a cell from the pool, blocking while none is free.
    ///
    /// Never returns an error: a pool that can permanently exhaust is a sizing
    /// bug and the caller is expected to hang (and be noticed) rather than be
    /// handed a synthetic failure to paper over (§4.1).
    pub async fn allocate(&self) -> Cell<T> {
        let permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .expect("pool semaphore is never closed");
        permit.forget();
        let value = self
            .inner
            .free
            .lock()
            .pop_front()
            .expect("semaphore permit guarantees a free cell is available");
        let used = self.inner.used.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak_used.fetch_max(used, Ordering::AcqRel);
        Cell {
            value: Some(value),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Non-blocking allocation; `None` if the pool is currently exhausted.
    pub fn try_allocate(&self) -> Option<Cell<T>> {
        let _permit = self.inner.semaphore.try_acquire().ok()?;
        _permit.forget();
        let value = self.inner.free.lock().pop_front()?;
        let used = self.inner.used.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak_used.fetch_max(used, Ordering::AcqRel);
        Some(Cell {
            value: Some(value),
            inner: Arc::clone(&self.inner),
        })
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.inner.total,
            used: self.inner.used.load(Ordering::Acquire),
            peak_used: self.inner.peak_used.load(Ordering::Acquire),
        }
    }
}

/// A cell checked out of a [`Pool`]; returns itself to the pool on drop.
///
/// Cheaply shared by wrapping in `Arc<Cell<T>>` at the message layer: the last
/// `Arc` drop runs this `Drop`, recycling the backing value with no heap churn.
pub struct Cell<T: Send + 'static> {
    value: Option<T>,
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> std::ops::Deref for Cell<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("cell value present until drop")
    }
}

impl<T: Send + 'static> std::ops::DerefMut for Cell<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("cell value present until drop")
    }
}

impl<T: Send + 'static> Drop for Cell<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.inner.free.lock().push_back(value);
            self.inner.used.fetch_sub(1, Ordering::AcqRel);
            self.inner.semaphore.add_permits(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_then_drop_returns_cell_to_pool() {
        let pool: Pool<u32> = Pool::new(2);
        assert_eq!(pool.stats().used, 0);
        let cell = pool.allocate().await;
        assert_eq!(pool.stats().used, 1);
        drop(cell);
        assert_eq!(pool.stats().used, 0);
    }

    #[tokio::test]
    async fn peak_used_tracks_high_water_mark() {
        let pool: Pool<u32> = Pool::new(3);
        let a = pool.allocate().await;
        let b = pool.allocate().await;
        assert_eq!(pool.stats().peak_used, 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().used, 0);
        assert_eq!(pool.stats().peak_used, 2);
    }

    #[tokio::test]
    async fn exhausted_pool_blocks_until_a_cell_is_released() {
        let pool: Pool<u32> = Pool::new(1);
        let first = pool.allocate().await;
        assert!(pool.try_allocate().is_none());

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move { pool_clone.allocate().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(pool.stats().used, 1);
        drop(second);
    }
}
