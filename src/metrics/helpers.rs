//! Metrics helper structs for convenient metric recording

use std::time::Instant;

use prometheus::{Encoder, TextEncoder};

use super::{
    BULK_REQUESTS_TOTAL, BULK_SIZE, DELIVERY_FAILURES_TOTAL, DELIVERY_TIMEOUTS_TOTAL,
    DISPATCHES_TOTAL, IGNORED_BROKER_EVENTS_TOTAL, PENDING_DELIVERIES, SEND_MESSAGE_DURATION,
    UNMATCHED_REPORTS_TOTAL,
};

const LABEL_CODE_OK: &str = "ok";
const LABEL_CODE_KO: &str = "ko";

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Measures one publish-and-confirm round trip.
///
/// Started before the record is submitted and finished once the outcome is
/// known, so the observation covers the whole wait on the broker.
#[derive(Debug)]
pub struct SendTimer {
    started: Instant,
}

impl SendTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Record elapsed milliseconds under the outcome label
    pub fn finish(self, success: bool) -> f64 {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let code = if success { LABEL_CODE_OK } else { LABEL_CODE_KO };
        SEND_MESSAGE_DURATION
            .with_label_values(&[code])
            .observe(elapsed_ms);
        elapsed_ms
    }
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a dispatch submitted for a channel and tier
    pub fn record_dispatch(channel: &str, tier: &str) {
        DISPATCHES_TOTAL.with_label_values(&[channel, tier]).inc();
    }

    /// Record a failure reported by the broker
    pub fn record_delivery_failure(topic: &str) {
        DELIVERY_FAILURES_TOTAL.with_label_values(&[topic]).inc();
    }

    /// Record a dispatch that gave up waiting
    pub fn record_timeout() {
        DELIVERY_TIMEOUTS_TOTAL.inc();
    }

    /// Set pending delivery count
    pub fn set_pending(count: usize) {
        PENDING_DELIVERIES.set(count as i64);
    }
}

/// Helper struct for delivery listener metrics
pub struct ListenerMetrics;

impl ListenerMetrics {
    /// Record a report with no waiting dispatch
    pub fn record_unmatched() {
        UNMATCHED_REPORTS_TOTAL.inc();
    }

    /// Record a non-delivery broker event
    pub fn record_ignored(kind: &str) {
        IGNORED_BROKER_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for bulk request metrics
pub struct BulkMetrics;

impl BulkMetrics {
    pub fn record_request(size: usize) {
        BULK_REQUESTS_TOTAL.inc();
        BULK_SIZE.observe(size as f64);
    }
}
