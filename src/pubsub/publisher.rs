//! Buffer broadcaster
//!
//! A publisher owns a pool and a list of live subscriptions. Publishing a
//! buffer counts the live subscriptions, stores that count on the buffer, and
//! pushes one copy to each.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::subscription::{Detach, Subscription, SubscriptionShared};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::payload::Payload;
use crate::pool::{Blank, Delivery, Handle, Pool, PoolStats};

/// Type-erased subscription that receives every buffer as a [`Handle`]
pub type Observer = Subscription<Handle>;

struct Subscribers<T: Payload> {
    typed: Vec<Arc<SubscriptionShared<Delivery<T>>>>,
    observers: Vec<Arc<SubscriptionShared<Handle>>>,
}

impl<T: Payload> Subscribers<T> {
    fn fan_out(&self) -> usize {
        self.typed.len() + self.observers.len()
    }
}

pub(crate) struct PublisherShared<T: Payload> {
    name: String,
    pool: Pool<T>,
    subscribers: Mutex<Subscribers<T>>,
}

impl<T: Payload> Detach<Delivery<T>> for PublisherShared<T> {
    fn unsubscribe(&self, sub: &Arc<SubscriptionShared<Delivery<T>>>) {
        self.subscribers
            .lock()
            .typed
            .retain(|s| !Arc::ptr_eq(s, sub));
    }
}

impl<T: Payload> Detach<Handle> for PublisherShared<T> {
    fn unsubscribe(&self, sub: &Arc<SubscriptionShared<Handle>>) {
        self.subscribers
            .lock()
            .observers
            .retain(|s| !Arc::ptr_eq(s, sub));
    }
}

/// Broadcasts pooled buffers to its subscriptions
///
/// Dropping the publisher invalidates every subscription still attached,
/// waking any thread blocked on one of them.
pub struct Publisher<T: Payload> {
    shared: Arc<PublisherShared<T>>,
}

impl<T: Payload> Publisher<T> {
    /// Create a publisher with a pool of `capacity` buffers built by `factory`
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        factory: impl FnMut() -> T,
    ) -> Result<Self> {
        let name = name.into();
        let pool = Pool::new(name.clone(), capacity, factory)?;
        Ok(Self::with_pool(name, pool))
    }

    /// Create a publisher around an existing pool
    pub fn with_pool(name: impl Into<String>, pool: Pool<T>) -> Self {
        Self {
            shared: Arc::new(PublisherShared {
                name: name.into(),
                pool,
                subscribers: Mutex::new(Subscribers {
                    typed: Vec::new(),
                    observers: Vec::new(),
                }),
            }),
        }
    }

    /// Attach a new typed subscription
    pub fn subscribe(&self) -> Subscription<Delivery<T>> {
        let weak: Weak<dyn Detach<Delivery<T>>> = Arc::<PublisherShared<T>>::downgrade(&self.shared);
        let mut subscribers = self.shared.subscribers.lock();
        let sub = Subscription::new(weak);
        subscribers.typed.push(sub.shared().clone());
        trace!(publisher = %self.shared.name, subscribers = subscribers.typed.len(), "Subscribed");
        sub
    }

    /// Attach a new anonymous observer
    ///
    /// Observers count toward fan-out like any subscription.
    pub fn observe(&self) -> Observer {
        let weak: Weak<dyn Detach<Handle>> = Arc::<PublisherShared<T>>::downgrade(&self.shared);
        let mut subscribers = self.shared.subscribers.lock();
        let sub = Subscription::new(weak);
        subscribers.observers.push(sub.shared().clone());
        trace!(
            publisher = %self.shared.name,
            observers = subscribers.observers.len(),
            "Observer attached"
        );
        sub
    }

    /// Push `blank` to every live subscription and return how many got it
    ///
    /// With nobody listening the buffer goes straight back to its pool and
    /// the result is 0.
    pub fn publish(&self, blank: Blank<T>) -> usize {
        let (pool, index) = blank.into_parts();
        let subscribers = self.shared.subscribers.lock();
        let fan_out = subscribers.fan_out();

        if fan_out == 0 {
            drop(subscribers);
            pool.recycle(index);
            METRICS.published(0);
            return 0;
        }

        // Count every copy before the first push so no early release can
        // reach zero
        pool.add_subscriptions(index, fan_out);
        for sub in &subscribers.typed {
            sub.push(Delivery::new(pool.clone(), index));
        }
        for observer in &subscribers.observers {
            observer.push(Handle::new(pool.clone(), index));
        }
        drop(subscribers);

        METRICS.published(fan_out as u64);
        fan_out
    }

    /// Take a blank buffer from this publisher's pool, blocking if empty
    pub fn acquire(&self) -> Blank<T> {
        self.shared.pool.acquire()
    }

    /// Take a blank buffer if one is free
    pub fn try_acquire(&self) -> Option<Blank<T>> {
        self.shared.pool.try_acquire()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Live typed subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().typed.len()
    }

    /// Live anonymous observers
    pub fn observer_count(&self) -> usize {
        self.shared.subscribers.lock().observers.len()
    }

    /// Copies the next publish would deliver
    pub fn fan_out(&self) -> usize {
        self.shared.subscribers.lock().fan_out()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }
}

impl<T: Payload> Drop for Publisher<T> {
    fn drop(&mut self) {
        let mut subscribers = self.shared.subscribers.lock();
        let invalidated = subscribers.fan_out();
        for sub in subscribers.typed.drain(..) {
            sub.invalidate();
        }
        for observer in subscribers.observers.drain(..) {
            observer.invalidate();
        }
        drop(subscribers);
        debug!(publisher = %self.shared.name, invalidated, "Publisher torn down");
    }
}

impl<T: Payload> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.shared.name)
            .field("fan_out", &self.fan_out())
            .finish()
    }
}
