//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BACKPRESSURE_REJECTED_TOTAL, BATCHES_DISPATCHED_TOTAL, BATCH_SPLITS_TOTAL, BUFFERED_ENTRIES,
    DISPATCH_LATENCY, ENTRIES_CLEARED_TOTAL, ENTRIES_ENQUEUED_TOTAL, MESSAGES_FAILED_TOTAL,
    MESSAGES_SENT_TOTAL, OVERSIZED_DROPPED_TOTAL, RETRY_EXHAUSTED_TOTAL, RETRY_REQUEUED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording buffer metrics
pub struct BufferMetrics;

impl BufferMetrics {
    pub fn record_enqueued(queue: &str, buffered: usize) {
        ENTRIES_ENQUEUED_TOTAL.with_label_values(&[queue]).inc();
        BUFFERED_ENTRIES.with_label_values(&[queue]).set(buffered as i64);
    }

    pub fn record_rejected(queue: &str) {
        BACKPRESSURE_REJECTED_TOTAL.with_label_values(&[queue]).inc();
    }

    pub fn set_buffered(queue: &str, buffered: usize) {
        BUFFERED_ENTRIES.with_label_values(&[queue]).set(buffered as i64);
    }

    pub fn record_cleared(queue: &str, count: usize) {
        ENTRIES_CLEARED_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
        BUFFERED_ENTRIES.with_label_values(&[queue]).set(0);
    }
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_batch(queue: &str, latency: Duration) {
        BATCHES_DISPATCHED_TOTAL.with_label_values(&[queue]).inc();
        DISPATCH_LATENCY
            .with_label_values(&[queue])
            .observe(latency.as_secs_f64());
    }

    pub fn record_sent(queue: &str, count: usize) {
        MESSAGES_SENT_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }

    pub fn record_non_retryable(queue: &str, count: usize) {
        MESSAGES_FAILED_TOTAL
            .with_label_values(&[queue, "non_retryable"])
            .inc_by(count as u64);
    }

    pub fn record_splits(queue: &str, count: usize) {
        BATCH_SPLITS_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }

    pub fn record_oversized(queue: &str, count: usize) {
        OVERSIZED_DROPPED_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }
}

/// Helper struct for recording retry metrics
pub struct RetryMetrics;

impl RetryMetrics {
    pub fn record_requeued(queue: &str, count: usize) {
        RETRY_REQUEUED_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
    }

    pub fn record_exhausted(queue: &str, count: usize) {
        RETRY_EXHAUSTED_TOTAL
            .with_label_values(&[queue])
            .inc_by(count as u64);
        MESSAGES_FAILED_TOTAL
            .with_label_values(&[queue, "retry_exhausted"])
            .inc_by(count as u64);
    }
}
