//! Reference-counted buffer pool
//!
//! A `Pool` pre-allocates a fixed number of payload slots. Producers acquire a
//! writable `Blank`, publish it, and every subscriber receives its own
//! read-only `Delivery`. The slot goes back to the pool when the last
//! delivery is released.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::slab::{Slab, SlotIndex};
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::payload::Payload;

/// What happens when a buffer's subscription count reaches zero
pub(crate) enum ReleaseAction {
    /// Return the slot to its pool
    Recycle,
    /// Release a chained upstream buffer, then return the slot
    RunThenRecycle(Handle),
}

/// Type-erased access to a pool's slots
pub(crate) trait SlotRelease: Send + Sync {
    /// Drop one subscription on the slot
    fn release(&self, index: SlotIndex);

    /// Run `f` against the slot's payload
    fn with_payload(&self, index: SlotIndex, f: &mut dyn FnMut(&dyn Any));

    fn pool_name(&self) -> &str;
}

/// Shared pool state, kept alive by the pool and every outstanding handle
pub(crate) struct PoolInner<T> {
    name: String,
    slab: Slab<T>,
    acquires: AtomicU64,
    recycles: AtomicU64,
}

impl<T: Payload> PoolInner<T> {
    fn blank(self: &Arc<Self>, index: SlotIndex) -> Blank<T> {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        METRICS.buffer_acquired();
        Blank {
            pool: self.clone(),
            index,
            published: false,
        }
    }

    /// Run the release action and push the slot back onto the free stack
    pub(crate) fn recycle(&self, index: SlotIndex) {
        let action = std::mem::replace(
            &mut *self.slab.slot(index).action.lock(),
            ReleaseAction::Recycle,
        );
        if let ReleaseAction::RunThenRecycle(chained) = action {
            drop(chained);
        }
        self.slab.put(index);
        self.recycles.fetch_add(1, Ordering::Relaxed);
        METRICS.buffer_recycled();
    }

    /// Account for `count` deliveries of a slot about to be pushed out
    pub(crate) fn add_subscriptions(&self, index: SlotIndex, count: usize) {
        self.slab
            .slot(index)
            .subscriptions
            .fetch_add(count, Ordering::AcqRel);
    }
}

impl<T: Payload> SlotRelease for PoolInner<T> {
    fn release(&self, index: SlotIndex) {
        let previous = self
            .slab
            .slot(index)
            .subscriptions
            .fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "buffer released more times than delivered");
        if previous == 1 {
            self.recycle(index);
        }
    }

    fn with_payload(&self, index: SlotIndex, f: &mut dyn FnMut(&dyn Any)) {
        let payload = self.slab.slot(index).payload.read();
        f(&*payload);
    }

    fn pool_name(&self) -> &str {
        &self.name
    }
}

/// Fixed-capacity blocking pool of payload buffers
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Payload> Pool<T> {
    /// Create a pool with `capacity` buffers built by `factory`
    ///
    /// Fails when `capacity` is zero or a produced payload has no bytes.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        mut factory: impl FnMut() -> T,
    ) -> Result<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(Error::InvalidCapacity { capacity });
        }

        let mut payloads = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let payload = factory();
            if payload.byte_size() == 0 {
                return Err(Error::EmptyPayload { pool: name });
            }
            payloads.push(payload);
        }

        debug!(pool = %name, capacity, "Buffer pool allocated");

        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                slab: Slab::new(payloads),
                acquires: AtomicU64::new(0),
                recycles: AtomicU64::new(0),
            }),
        })
    }

    /// Take a blank buffer, blocking until one is recycled if the pool is empty
    pub fn acquire(&self) -> Blank<T> {
        let index = self.inner.slab.take();
        self.inner.blank(index)
    }

    /// Take a blank buffer if one is free
    pub fn try_acquire(&self) -> Option<Blank<T>> {
        let index = self.inner.slab.try_take()?;
        Some(self.inner.blank(index))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.slab.capacity()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let capacity = self.inner.slab.capacity();
        let available = self.inner.slab.available();
        PoolStats {
            capacity,
            available,
            in_flight: capacity - available,
            acquires: self.inner.acquires.load(Ordering::Relaxed),
            recycles: self.inner.recycles.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.slab.capacity())
            .finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub in_flight: usize,
    pub acquires: u64,
    pub recycles: u64,
}

/// An acquired buffer that has not been published yet
///
/// Dropping an unpublished blank recycles it.
pub struct Blank<T: Payload> {
    pool: Arc<PoolInner<T>>,
    index: SlotIndex,
    published: bool,
}

impl<T: Payload> Blank<T> {
    /// Read the payload
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.pool.slab.slot(self.index).payload.read()
    }

    /// Write the payload
    pub fn write(&mut self) -> RwLockWriteGuard<'_, T> {
        self.pool.slab.slot(self.index).payload.write()
    }

    /// Hold `upstream` until this buffer is recycled
    ///
    /// The upstream buffer is released right before this one goes back to
    /// its pool, whether it is published or dropped unpublished.
    pub fn chain(&mut self, upstream: impl Into<Handle>) {
        let previous = std::mem::replace(
            &mut *self.pool.slab.slot(self.index).action.lock(),
            ReleaseAction::RunThenRecycle(upstream.into()),
        );
        drop(previous);
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }

    /// Hand the slot over to a publisher
    pub(crate) fn into_parts(mut self) -> (Arc<PoolInner<T>>, SlotIndex) {
        self.published = true;
        (self.pool.clone(), self.index)
    }
}

impl<T: Payload> Drop for Blank<T> {
    fn drop(&mut self) {
        if !self.published {
            self.pool.recycle(self.index);
        }
    }
}

/// One subscriber's copy of a published buffer
///
/// Dropping it (or calling [`Delivery::release`]) gives up this copy; the
/// last copy released returns the buffer to its pool.
pub struct Delivery<T: Payload> {
    pool: Arc<PoolInner<T>>,
    index: SlotIndex,
    live: bool,
}

impl<T: Payload> Delivery<T> {
    pub(crate) fn new(pool: Arc<PoolInner<T>>, index: SlotIndex) -> Self {
        Self {
            pool,
            index,
            live: true,
        }
    }

    /// Read the payload
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.pool.slab.slot(self.index).payload.read()
    }

    /// Give up this copy
    pub fn release(self) {
        drop(self);
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }

    /// Erase the payload type, keeping this copy alive
    pub fn into_handle(mut self) -> Handle {
        self.live = false;
        Handle {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

impl<T: Payload> Drop for Delivery<T> {
    fn drop(&mut self) {
        if self.live {
            self.pool.release(self.index);
        }
    }
}

impl<T: Payload> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("pool", &self.pool.name)
            .field("slot", &self.index.index())
            .finish()
    }
}

/// A type-erased delivered buffer
pub struct Handle {
    pool: Arc<dyn SlotRelease>,
    index: SlotIndex,
}

impl Handle {
    pub(crate) fn new(pool: Arc<dyn SlotRelease>, index: SlotIndex) -> Self {
        Self { pool, index }
    }

    /// Read the payload if it is a `U`
    pub fn read<U: 'static, R>(&self, f: impl FnOnce(&U) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.pool.with_payload(self.index, &mut |payload| {
            if let (Some(typed), Some(f)) = (payload.downcast_ref::<U>(), f.take()) {
                out = Some(f(typed));
            }
        });
        out
    }

    /// Name of the pool that owns this buffer
    pub fn pool_name(&self) -> &str {
        self.pool.pool_name()
    }

    pub fn slot(&self) -> SlotIndex {
        self.index
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl<T: Payload> From<Delivery<T>> for Handle {
    fn from(delivery: Delivery<T>) -> Self {
        delivery.into_handle()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("pool", &self.pool.pool_name())
            .field("slot", &self.index.index())
            .finish()
    }
}
