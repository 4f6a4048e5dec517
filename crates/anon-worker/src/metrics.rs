//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const ITEMS_LEASED_TOTAL: &str = "anon_items_leased_total";
    pub const ITEMS_COMPLETED_TOTAL: &str = "anon_items_completed_total";
    pub const ITEMS_FAILED_TOTAL: &str = "anon_items_failed_total";
    pub const RESULTS_PUBLISHED_TOTAL: &str = "anon_results_published_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "anon_publish_failures_total";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Without a recorder every `record_*` call is a no-op.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::startup_failed(format!("metrics exporter: {}", e)))?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_item_leased() {
    counter!(names::ITEMS_LEASED_TOTAL).increment(1);
}

/// Record an acknowledged item.
pub fn record_item_completed() {
    counter!(names::ITEMS_COMPLETED_TOTAL).increment(1);
}

pub fn record_item_failed(stage: &'static str) {
    counter!(names::ITEMS_FAILED_TOTAL, "stage" => stage).increment(1);
}

pub fn record_result_published() {
    counter!(names::RESULTS_PUBLISHED_TOTAL).increment(1);
}

pub fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}
