//! Prometheus metrics for the communication engine.
//!
//! This module provides metrics for monitoring dispatch and confirmation:
//! - Send latency by delivery outcome
//! - Dispatch counts by channel and urgency tier
//! - Delivery failures, timeouts and unmatched reports
//! - Bulk request sizes

mod helpers;

pub use helpers::{encode_metrics, BulkMetrics, DispatchMetrics, ListenerMetrics, SendTimer};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "communication";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Publish-and-confirm latency, labeled ok/ko by delivery outcome
    pub static ref SEND_MESSAGE_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_send_message_duration_milliseconds", METRIC_PREFIX),
        "Time from publish to delivery report in milliseconds",
        &["code"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0]
    ).unwrap();

    /// Dispatches by channel and tier
    pub static ref DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatches_total", METRIC_PREFIX),
        "Total channel dispatches submitted to the broker",
        &["channel", "tier"]
    ).unwrap();

    /// Delivery failures reported by the broker
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total delivery failures reported by the broker",
        &["topic"]
    ).unwrap();

    /// Dispatches that gave up waiting for a delivery report
    pub static ref DELIVERY_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivery_timeouts_total", METRIC_PREFIX),
        "Total dispatches that timed out waiting for a delivery report"
    ).unwrap();

    /// Dispatches currently waiting for a delivery report
    pub static ref PENDING_DELIVERIES: IntGauge = register_int_gauge!(
        format!("{}_pending_deliveries", METRIC_PREFIX),
        "Current number of dispatches awaiting a delivery report"
    ).unwrap();

    // ============================================================================
    // Listener Metrics
    // ============================================================================

    /// Reports whose correlation token matched no waiting dispatch
    pub static ref UNMATCHED_REPORTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_unmatched_reports_total", METRIC_PREFIX),
        "Total delivery reports with no matching pending dispatch"
    ).unwrap();

    /// Non-delivery broker events seen by the listener
    pub static ref IGNORED_BROKER_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ignored_broker_events_total", METRIC_PREFIX),
        "Total broker events ignored by the delivery listener",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Bulk API Metrics
    // ============================================================================

    /// Bulk requests processed
    pub static ref BULK_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bulk_requests_total", METRIC_PREFIX),
        "Total bulk communication requests"
    ).unwrap();

    /// Events per bulk request
    pub static ref BULK_SIZE: Histogram = register_histogram!(
        format!("{}_bulk_size", METRIC_PREFIX),
        "Number of events per bulk request",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]
    ).unwrap();
}
