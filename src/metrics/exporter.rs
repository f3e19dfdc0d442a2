//! Prometheus metrics exporter
//!
//! Mirrors the atomic counters into the `metrics` registry so they can be
//! scraped over HTTP.

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Install the Prometheus exporter and start the sync task
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<JoinHandle<()>> {
    describe_counter!("relaypool_buffers_acquired_total", "Buffers taken from a pool");
    describe_counter!("relaypool_buffers_recycled_total", "Buffers returned to a pool");
    describe_counter!("relaypool_publishes_total", "Publish calls");
    describe_counter!("relaypool_deliveries_total", "Deliveries handed to subscribers");
    describe_counter!("relaypool_empty_publishes_total", "Publishes that reached nobody");
    describe_counter!("relaypool_subscriptions_opened_total", "Subscriptions created");
    describe_gauge!("relaypool_subscriptions_active", "Subscriptions currently alive");
    describe_counter!("relaypool_joins_completed_total", "Mailbox joins that completed");
    describe_counter!("relaypool_joins_failed_total", "Mailbox joins that failed");
    describe_counter!("relaypool_stages_started_total", "Stage drivers started");
    describe_gauge!("relaypool_stages_running", "Stage drivers currently running");
    describe_counter!("relaypool_stages_terminated_total", "Stage drivers terminated");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()
        .with_context(|| format!("Failed to start Prometheus exporter on {}", config.bind_addr))?;

    Ok(tokio::spawn(sync_metrics_task()))
}

/// Periodically push counter deltas to the metrics registry
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(SYNC_INTERVAL);
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;
        let now = METRICS.snapshot();
        sync(&now, &last);
        last = now;
    }
}

fn sync(now: &MetricsSnapshot, last: &MetricsSnapshot) {
    let deltas = [
        ("relaypool_buffers_acquired_total", now.buffers_acquired, last.buffers_acquired),
        ("relaypool_buffers_recycled_total", now.buffers_recycled, last.buffers_recycled),
        ("relaypool_publishes_total", now.publishes, last.publishes),
        ("relaypool_deliveries_total", now.deliveries, last.deliveries),
        ("relaypool_empty_publishes_total", now.empty_publishes, last.empty_publishes),
        (
            "relaypool_subscriptions_opened_total",
            now.subscriptions_opened,
            last.subscriptions_opened,
        ),
        ("relaypool_joins_completed_total", now.joins_completed, last.joins_completed),
        ("relaypool_joins_failed_total", now.joins_failed, last.joins_failed),
        ("relaypool_stages_started_total", now.stages_started, last.stages_started),
        ("relaypool_stages_terminated_total", now.stages_terminated, last.stages_terminated),
    ];
    for (name, current, previous) in deltas {
        let delta = current.saturating_sub(previous);
        if delta > 0 {
            counter!(name).increment(delta);
        }
    }

    gauge!("relaypool_subscriptions_active").set(now.subscriptions_active as f64);
    gauge!("relaypool_stages_running").set(now.stages_running as f64);
}
