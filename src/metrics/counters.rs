//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Pool metrics
    pub buffers_acquired: AtomicU64,
    pub buffers_recycled: AtomicU64,

    // Publish metrics
    pub publishes: AtomicU64,
    pub deliveries: AtomicU64,
    pub empty_publishes: AtomicU64,

    // Subscription metrics
    pub subscriptions_opened: AtomicU64,
    pub subscriptions_active: AtomicU64,

    // Join metrics
    pub joins_completed: AtomicU64,
    pub joins_failed: AtomicU64,

    // Stage metrics
    pub stages_started: AtomicU64,
    pub stages_running: AtomicU64,
    pub stages_terminated: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            buffers_acquired: AtomicU64::new(0),
            buffers_recycled: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            empty_publishes: AtomicU64::new(0),
            subscriptions_opened: AtomicU64::new(0),
            subscriptions_active: AtomicU64::new(0),
            joins_completed: AtomicU64::new(0),
            joins_failed: AtomicU64::new(0),
            stages_started: AtomicU64::new(0),
            stages_running: AtomicU64::new(0),
            stages_terminated: AtomicU64::new(0),
        }
    }

    // Pool tracking
    #[inline]
    pub fn buffer_acquired(&self) {
        self.buffers_acquired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn buffer_recycled(&self) {
        self.buffers_recycled.fetch_add(1, Ordering::Relaxed);
    }

    // Publish tracking
    #[inline]
    pub fn published(&self, fan_out: u64) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        if fan_out == 0 {
            self.empty_publishes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deliveries.fetch_add(fan_out, Ordering::Relaxed);
        }
    }

    // Subscription tracking
    #[inline]
    pub fn subscription_opened(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
        self.subscriptions_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn subscription_closed(&self) {
        self.subscriptions_active.fetch_sub(1, Ordering::Relaxed);
    }

    // Join tracking
    #[inline]
    pub fn join_completed(&self) {
        self.joins_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn join_failed(&self) {
        self.joins_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Stage tracking
    #[inline]
    pub fn stage_started(&self) {
        self.stages_started.fetch_add(1, Ordering::Relaxed);
        self.stages_running.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo `stage_started` for a stage whose thread never ran
    #[inline]
    pub fn stage_spawn_failed(&self) {
        self.stages_started.fetch_sub(1, Ordering::Relaxed);
        self.stages_running.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn stage_terminated(&self) {
        self.stages_running.fetch_sub(1, Ordering::Relaxed);
        self.stages_terminated.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            buffers_acquired: self.buffers_acquired.load(Ordering::Relaxed),
            buffers_recycled: self.buffers_recycled.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            empty_publishes: self.empty_publishes.load(Ordering::Relaxed),
            subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
            subscriptions_active: self.subscriptions_active.load(Ordering::Relaxed),
            joins_completed: self.joins_completed.load(Ordering::Relaxed),
            joins_failed: self.joins_failed.load(Ordering::Relaxed),
            stages_started: self.stages_started.load(Ordering::Relaxed),
            stages_running: self.stages_running.load(Ordering::Relaxed),
            stages_terminated: self.stages_terminated.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub buffers_acquired: u64,
    pub buffers_recycled: u64,
    pub publishes: u64,
    pub deliveries: u64,
    pub empty_publishes: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_active: u64,
    pub joins_completed: u64,
    pub joins_failed: u64,
    pub stages_started: u64,
    pub stages_running: u64,
    pub stages_terminated: u64,
}
