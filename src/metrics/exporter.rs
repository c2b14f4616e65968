//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("nodepool_connect_attempts", "Connect attempts started");
    describe_counter!("nodepool_connects_succeeded", "Connect attempts that produced a handle");
    describe_counter!("nodepool_connects_failed", "Connect attempts rejected by the endpoint");
    describe_counter!("nodepool_timeouts_total", "Connect attempts cancelled by timeout");
    describe_counter!("nodepool_duplicates_dropped", "Connections discarded as duplicates");
    describe_gauge!("nodepool_connections_active", "Currently registered connections");
    describe_counter!("nodepool_disconnects_total", "Error or disconnect signals received");
    describe_counter!("nodepool_reconnects_succeeded", "Endpoints re-established");
    describe_counter!("nodepool_reconnects_failed", "Endpoints given up after retries");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Periodically sync the atomic counters into the metrics registry
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;
        let snapshot = METRICS.snapshot();

        increment("nodepool_connect_attempts", snapshot.connect_attempts, last.connect_attempts);
        increment("nodepool_connects_succeeded", snapshot.connects_succeeded, last.connects_succeeded);
        increment("nodepool_connects_failed", snapshot.connects_failed, last.connects_failed);
        increment("nodepool_timeouts_total", snapshot.timeouts_total, last.timeouts_total);
        increment("nodepool_duplicates_dropped", snapshot.duplicates_dropped, last.duplicates_dropped);
        increment("nodepool_disconnects_total", snapshot.disconnects_total, last.disconnects_total);
        increment("nodepool_reconnects_succeeded", snapshot.reconnects_succeeded, last.reconnects_succeeded);
        increment("nodepool_reconnects_failed", snapshot.reconnects_failed, last.reconnects_failed);

        gauge!("nodepool_connections_active").set(snapshot.connections_active as f64);

        last = snapshot;
    }
}

fn increment(name: &'static str, current: u64, previous: u64) {
    let delta = current.saturating_sub(previous);
    if delta > 0 {
        counter!(name).increment(delta);
    }
}
