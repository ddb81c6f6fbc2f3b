//! Metrics collection and exposition.
//!
//! # Metrics
//! - `watch_proxy_requests_total` (counter): requests by kind and status
//! - `watch_proxy_request_duration_seconds` (histogram): direct request latency
//! - `watch_proxy_upstream_watches_total` (counter): upstream watch calls issued
//! - `watch_proxy_active_units` (gauge): fingerprints with a live unit
//! - `watch_proxy_subscribers` (gauge): attached watch subscribers
//! - `watch_proxy_slow_subscribers_total` (counter): subscribers dropped for not keeping up
//! - `watch_proxy_direct_retries_total` (counter): direct attempts repeated on another endpoint

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// `kind` is `watch` or `direct`.
pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "watch_proxy_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("watch_proxy_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_watch() {
    metrics::counter!("watch_proxy_upstream_watches_total").increment(1);
}

pub fn set_active_units(count: usize) {
    metrics::gauge!("watch_proxy_active_units").set(count as f64);
}

pub fn record_subscriber_attached() {
    metrics::gauge!("watch_proxy_subscribers").increment(1.0);
}

pub fn record_subscribers_detached(count: usize) {
    if count > 0 {
        metrics::gauge!("watch_proxy_subscribers").decrement(count as f64);
    }
}

pub fn record_slow_subscribers(count: usize) {
    metrics::counter!("watch_proxy_slow_subscribers_total").increment(count as u64);
}

pub fn record_direct_retry() {
    metrics::counter!("watch_proxy_direct_retries_total").increment(1);
}
