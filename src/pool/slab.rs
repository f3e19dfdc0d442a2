//! Buffer slot arena
//!
//! Fixed set of payload slots addressed by index, with a LIFO free stack.
//! Taking a slot blocks while the stack is empty.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::AtomicUsize;

use super::buffer::ReleaseAction;

/// Index of a slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Get the raw index
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One buffer: payload, live subscription count, release action
pub(crate) struct BufferSlot<T> {
    pub(crate) payload: RwLock<T>,
    pub(crate) subscriptions: AtomicUsize,
    pub(crate) action: Mutex<ReleaseAction>,
}

/// Arena of buffer slots with a blocking free stack
pub(crate) struct Slab<T> {
    slots: Box<[BufferSlot<T>]>,
    /// Free slot indices; top of stack is the most recently recycled
    free: Mutex<Vec<usize>>,
    available: Condvar,
}

impl<T> Slab<T> {
    /// Build an arena owning the given payloads, all initially free
    pub(crate) fn new(payloads: Vec<T>) -> Self {
        let capacity = payloads.len();
        let slots: Vec<BufferSlot<T>> = payloads
            .into_iter()
            .map(|payload| BufferSlot {
                payload: RwLock::new(payload),
                subscriptions: AtomicUsize::new(0),
                action: Mutex::new(ReleaseAction::Recycle),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            free: Mutex::new((0..capacity).rev().collect()),
            available: Condvar::new(),
        }
    }

    /// Pop a free slot, waiting until one is recycled if none is free
    pub(crate) fn take(&self) -> SlotIndex {
        let mut free = self.free.lock();
        loop {
            if let Some(idx) = free.pop() {
                return SlotIndex(idx);
            }
            self.available.wait(&mut free);
        }
    }

    /// Pop a free slot without waiting
    pub(crate) fn try_take(&self) -> Option<SlotIndex> {
        self.free.lock().pop().map(SlotIndex)
    }

    /// Push a slot back onto the free stack and wake one waiter
    pub(crate) fn put(&self, idx: SlotIndex) {
        let mut free = self.free.lock();
        debug_assert!(free.len() < self.slots.len(), "slab over-recycled");
        free.push(idx.0);
        drop(free);
        self.available.notify_one();
    }

    pub(crate) fn slot(&self, idx: SlotIndex) -> &BufferSlot<T> {
        &self.slots[idx.0]
    }

    /// Number of slots currently on the free stack
    pub(crate) fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}
