//! Metrics for the batch broker.
//!
//! Two layers live here:
//! - `registry`: per-broker, per-queue counters read back through
//!   `get_metrics()` / `get_queue_status()`
//! - process-wide Prometheus collectors labelled by queue, for scraping

mod helpers;
mod registry;

pub use helpers::{encode_metrics, BufferMetrics, DispatchMetrics, RetryMetrics};
pub use registry::{MetricsRegistry, QueueMetrics, QueueMetricsSnapshot};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "batch_broker";

lazy_static! {
    // ============================================================================
    // Buffer Metrics
    // ============================================================================

    /// Entries accepted into a queue buffer
    pub static ref ENTRIES_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_entries_enqueued_total", METRIC_PREFIX),
        "Total entries accepted into a queue buffer",
        &["queue"]
    ).unwrap();

    /// Enqueue attempts rejected because the buffer was full
    pub static ref BACKPRESSURE_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_backpressure_rejected_total", METRIC_PREFIX),
        "Total enqueue attempts rejected by backpressure",
        &["queue"]
    ).unwrap();

    /// Entries currently buffered
    pub static ref BUFFERED_ENTRIES: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_buffered_entries", METRIC_PREFIX),
        "Entries currently buffered per queue",
        &["queue"]
    ).unwrap();

    /// Entries discarded by an explicit buffer clear
    pub static ref ENTRIES_CLEARED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_entries_cleared_total", METRIC_PREFIX),
        "Total entries discarded by clear_queue_buffer",
        &["queue"]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Entries accepted by the queueing service
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages accepted by the queueing service",
        &["queue"]
    ).unwrap();

    /// Entries permanently dropped after a dispatch failure
    pub static ref MESSAGES_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total messages permanently dropped after dispatch failure",
        &["queue", "reason"]
    ).unwrap();

    /// Batch send calls made
    pub static ref BATCHES_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_batches_dispatched_total", METRIC_PREFIX),
        "Total batch send calls",
        &["queue"]
    ).unwrap();

    /// Additional batches caused by splitting a drain
    pub static ref BATCH_SPLITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_batch_splits_total", METRIC_PREFIX),
        "Total additional batches produced by splitting a drain",
        &["queue"]
    ).unwrap();

    /// Entries dropped at planning time for exceeding the size ceiling
    pub static ref OVERSIZED_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_oversized_dropped_total", METRIC_PREFIX),
        "Total entries dropped for exceeding the single-message size limit",
        &["queue"]
    ).unwrap();

    /// Batch send latency
    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Batch send call latency in seconds",
        &["queue"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Entries parked for a later retry
    pub static ref RETRY_REQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_retry_requeued_total", METRIC_PREFIX),
        "Total entries scheduled for retry after a retryable failure",
        &["queue"]
    ).unwrap();

    /// Entries dropped after reaching the retry limit
    pub static ref RETRY_EXHAUSTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_retry_exhausted_total", METRIC_PREFIX),
        "Total entries dropped after exhausting retry attempts",
        &["queue"]
    ).unwrap();
}
