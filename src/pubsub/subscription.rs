//! Per-consumer delivery channel
//!
//! A subscription is owned by its consumer. The publisher keeps a shared
//! reference to push deliveries and to invalidate it on teardown. Lock order:
//! publisher list, then subscription, then mailbox.

use crossbeam::channel;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

use super::mailbox::{Mailbox, MailboxShared, Slot};
use crate::metrics::METRICS;

/// Publisher side of the back-reference held by a subscription
pub(crate) trait Detach<D>: Send + Sync {
    fn unsubscribe(&self, sub: &Arc<SubscriptionShared<D>>);
}

/// A slot waiting for the next push
struct Armed<D> {
    tx: channel::Sender<D>,
    mailbox: Arc<MailboxShared>,
}

struct SubscriptionState<D> {
    queue: VecDeque<D>,
    /// `None` once invalidated or torn down
    publisher: Option<Weak<dyn Detach<D>>>,
    armed: Option<Armed<D>>,
}

pub(crate) struct SubscriptionShared<D> {
    state: Mutex<SubscriptionState<D>>,
    changed: Condvar,
}

impl<D: Send + 'static> SubscriptionShared<D> {
    /// Deliver one buffer, straight into an armed slot if there is one
    pub(crate) fn push(&self, mut data: D) {
        let mut state = self.state.lock();
        if let Some(armed) = state.armed.take() {
            match armed.tx.try_send(data) {
                Ok(()) => {
                    armed.mailbox.arrived();
                    return;
                }
                Err(err) => {
                    // Slot dropped without cancel; keep the buffer queued
                    armed.mailbox.withdraw();
                    data = err.into_inner();
                }
            }
        }
        state.queue.push_back(data);
        drop(state);
        self.changed.notify_all();
    }

    /// Mark the publisher gone and wake everyone waiting on this subscription
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.publisher = None;
        if let Some(armed) = state.armed.take() {
            armed.mailbox.fail(true);
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// Outcome of a bounded pull
#[derive(Debug)]
pub enum Pulled<D> {
    /// The oldest queued delivery
    Ready(D),
    /// The publisher is gone and the queue is empty
    Gone,
    /// Nothing arrived in time
    TimedOut,
}

/// A consumer's delivery channel bound to one publisher
///
/// `D` is `Delivery<T>` for typed subscriptions and `Handle` for anonymous
/// observers. Dropping the subscription unsubscribes it and releases every
/// buffer still queued.
pub struct Subscription<D: Send + 'static> {
    shared: Arc<SubscriptionShared<D>>,
}

impl<D: Send + 'static> Subscription<D> {
    pub(crate) fn new(publisher: Weak<dyn Detach<D>>) -> Self {
        Self::with_publisher(Some(publisher))
    }

    /// A subscription whose publisher is already gone
    pub(crate) fn detached() -> Self {
        Self::with_publisher(None)
    }

    fn with_publisher(publisher: Option<Weak<dyn Detach<D>>>) -> Self {
        METRICS.subscription_opened();
        Self {
            shared: Arc::new(SubscriptionShared {
                state: Mutex::new(SubscriptionState {
                    queue: VecDeque::new(),
                    publisher,
                    armed: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SubscriptionShared<D>> {
        &self.shared
    }

    /// Take the oldest delivery, blocking until one arrives
    ///
    /// Returns `None` once the publisher is gone and the queue is drained.
    pub fn pull(&self) -> Option<D> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(data) = state.queue.pop_front() {
                return Some(data);
            }
            if state.publisher.is_none() {
                return None;
            }
            self.shared.changed.wait(&mut state);
        }
    }

    /// Take the oldest delivery, waiting at most `timeout`
    pub fn pull_timeout(&self, timeout: Duration) -> Pulled<D> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(data) = state.queue.pop_front() {
                return Pulled::Ready(data);
            }
            if state.publisher.is_none() {
                return Pulled::Gone;
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Pulled::TimedOut;
            }
        }
    }

    /// Take the oldest delivery without waiting
    pub fn try_pull(&self) -> Option<D> {
        self.shared.state.lock().queue.pop_front()
    }

    /// Arm a slot in `mailbox` for the next delivery
    ///
    /// A queued delivery fills the slot at once. If the publisher is already
    /// gone the mailbox is failed. Otherwise the next push fills the slot and
    /// notifies the mailbox.
    pub fn arm(&self, mailbox: &Mailbox) -> Slot<D> {
        let (tx, rx) = channel::bounded(1);
        let mut state = self.shared.state.lock();

        if let Some(previous) = state.armed.take() {
            previous.mailbox.withdraw();
        }

        if let Some(data) = state.queue.pop_front() {
            // Receiver is held right here, the send cannot fail
            let _ = tx.try_send(data);
            return Slot::new(rx);
        }

        if state.publisher.is_none() {
            mailbox.shared().fail(false);
            return Slot::new(rx);
        }

        mailbox.shared().expect();
        state.armed = Some(Armed {
            tx,
            mailbox: mailbox.shared().clone(),
        });
        Slot::new(rx)
    }

    /// Disarm a pending slot
    ///
    /// A delivery that raced ahead stays in its slot.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if let Some(armed) = state.armed.take() {
            armed.mailbox.withdraw();
        }
    }

    /// Whether the publisher is still alive
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().publisher.is_some()
    }

    /// Number of deliveries waiting in the queue
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }
}

impl<D: Send + 'static> Drop for Subscription<D> {
    fn drop(&mut self) {
        // Detach first so the publisher stops pushing before we drain
        let publisher = self.shared.state.lock().publisher.take();
        if let Some(publisher) = publisher.and_then(|weak| weak.upgrade()) {
            publisher.unsubscribe(&self.shared);
        }

        let (drained, armed) = {
            let mut state = self.shared.state.lock();
            (std::mem::take(&mut state.queue), state.armed.take())
        };
        if let Some(armed) = armed {
            armed.mailbox.withdraw();
        }
        trace!(released = drained.len(), "Subscription dropped");
        drop(drained);
        METRICS.subscription_closed();
    }
}

impl<D: Send + 'static> fmt::Debug for Subscription<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Subscription")
            .field("active", &state.publisher.is_some())
            .field("queued", &state.queue.len())
            .field("armed", &state.armed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Stand-in publisher that records unsubscribes
    #[derive(Default)]
    struct Recorder {
        unsubscribed: Mutex<usize>,
    }

    impl Detach<u32> for Recorder {
        fn unsubscribe(&self, _sub: &Arc<SubscriptionShared<u32>>) {
            *self.unsubscribed.lock() += 1;
        }
    }

    fn subscription(recorder: &Arc<Recorder>) -> Subscription<u32> {
        let weak: Weak<dyn Detach<u32>> = Arc::downgrade(recorder) as Weak<dyn Detach<u32>>;
        Subscription::new(weak)
    }

    #[test]
    fn test_pull_fifo_then_gone() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);

        sub.shared().push(1);
        sub.shared().push(2);
        sub.shared().invalidate();

        // Queued deliveries survive invalidation
        assert_eq!(sub.pull(), Some(1));
        assert_eq!(sub.pull(), Some(2));
        assert_eq!(sub.pull(), None);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_pull_blocks_until_push() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);
        let shared = sub.shared().clone();

        let pusher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            shared.push(7);
        });

        assert_eq!(sub.pull(), Some(7));
        pusher.join().unwrap();
    }

    #[test]
    fn test_pull_timeout() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);
        assert!(matches!(sub.pull_timeout(Duration::from_millis(10)), Pulled::TimedOut));

        sub.shared().push(3);
        assert!(matches!(sub.pull_timeout(Duration::from_millis(10)), Pulled::Ready(3)));

        sub.shared().invalidate();
        assert!(matches!(sub.pull_timeout(Duration::from_millis(10)), Pulled::Gone));
    }

    #[test]
    fn test_arm_takes_queued_first() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);
        sub.shared().push(5);

        let mailbox = Mailbox::new();
        let slot = sub.arm(&mailbox);
        assert!(!sub.is_armed());
        assert_eq!(mailbox.pending(), 0);
        assert_eq!(slot.take(), Some(5));
    }

    #[test]
    fn test_push_fills_armed_slot_bypassing_queue() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);

        let mailbox = Mailbox::new();
        let slot = sub.arm(&mailbox);
        assert_eq!(mailbox.pending(), 1);

        sub.shared().push(9);
        assert!(mailbox.wait());
        assert_eq!(sub.queued(), 0);
        assert_eq!(slot.take(), Some(9));
    }

    #[test]
    fn test_arm_after_invalidate_fails_mailbox() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);
        sub.shared().invalidate();

        let mailbox = Mailbox::new();
        let slot = sub.arm(&mailbox);
        assert!(!mailbox.wait());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_invalidate_fails_armed_mailbox() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);

        let mailbox = Mailbox::new();
        let _slot = sub.arm(&mailbox);
        sub.shared().invalidate();

        assert!(!mailbox.wait());
        assert!(!sub.is_armed());
    }

    #[test]
    fn test_cancel_then_push_queues() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);

        let mailbox = Mailbox::new();
        let slot = sub.arm(&mailbox);
        sub.cancel();
        assert_eq!(mailbox.pending(), 0);

        sub.shared().push(4);
        assert!(slot.take().is_none());
        assert_eq!(sub.try_pull(), Some(4));
    }

    #[test]
    fn test_detached_is_end_of_stream() {
        let sub: Subscription<u32> = Subscription::detached();
        assert!(!sub.is_active());
        assert_eq!(sub.pull(), None);
    }

    #[test]
    fn test_drop_unsubscribes_live_publisher() {
        let recorder = Arc::new(Recorder::default());
        let sub = subscription(&recorder);
        drop(sub);
        assert_eq!(*recorder.unsubscribed.lock(), 1);

        let sub = subscription(&recorder);
        sub.shared().invalidate();
        drop(sub);
        assert_eq!(*recorder.unsubscribed.lock(), 1);
    }
}
