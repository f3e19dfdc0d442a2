//! Metrics and observability
//!
//! Atomic counters on the hot path, with optional Prometheus export and a
//! JSON stats endpoint.

mod api;
mod counters;
mod exporter;

pub use api::start_api_server;
pub use counters::*;
pub use exporter::init_metrics;
