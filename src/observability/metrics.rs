//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): requests by method, status, mode
//! - `relay_request_duration_seconds` (histogram): end-to-end latency
//! - `relay_routing_lookups_total` (counter): cache `hit` / `miss`
//! - `relay_channel_connects_total` (counter): `success` / `failure`
//! - `relay_malformed_frames_total` (counter): discarded inbound frames
//! - `relay_chunks_total` (counter): chunk frames by direction
//! - `relay_duplicate_chunks_total` (counter): overwritten chunk indices
//! - `relay_correlations_total` (counter): how each wait ended
//! - `relay_blob_cleanups_total` (counter): post-delivery cleanup outcome
//! - `relay_inflight_requests` (gauge): requests awaiting a response
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these freely.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, mode: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("mode", mode.to_string()),
    ];
    counter!("relay_requests_total", &labels).increment(1);
    histogram!("relay_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_routing_lookup(outcome: &'static str) {
    counter!("relay_routing_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_channel_connect(outcome: &'static str) {
    counter!("relay_channel_connects_total", "outcome" => outcome).increment(1);
}

pub fn record_malformed_frame() {
    counter!("relay_malformed_frames_total").increment(1);
}

pub fn record_chunks(direction: &'static str, count: usize) {
    counter!("relay_chunks_total", "direction" => direction).increment(count as u64);
}

pub fn record_duplicate_chunk() {
    counter!("relay_duplicate_chunks_total").increment(1);
}

pub fn record_correlation(outcome: &'static str) {
    counter!("relay_correlations_total", "outcome" => outcome).increment(1);
}

pub fn record_blob_cleanup(outcome: &'static str) {
    counter!("relay_blob_cleanups_total", "outcome" => outcome).increment(1);
}

pub fn record_inflight(count: usize) {
    gauge!("relay_inflight_requests").set(count as f64);
}
