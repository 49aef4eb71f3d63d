//! Read-only views returned by the broker facade.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::QueueMetricsSnapshot;

/// Snapshot returned by `get_metrics()`, keyed by logical queue name.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerMetricsSnapshot {
    pub buffer_sizes: BTreeMap<String, usize>,
    /// Entries waiting out a retry backoff
    pub failed_message_counts: BTreeMap<String, usize>,
    pub metrics: BTreeMap<String, QueueMetricsSnapshot>,
    pub max_buffer_size_per_queue: usize,
    pub max_retry_attempts: u32,
    pub background_thread_alive: bool,
}

impl BrokerMetricsSnapshot {
    /// Sum of one counter across all queues.
    pub fn total(&self, counter: impl Fn(&QueueMetricsSnapshot) -> u64) -> u64 {
        self.metrics.values().map(counter).sum()
    }
}

/// Single-queue slice returned by `get_queue_status()`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_name: String,
    pub buffer_size: usize,
    pub failed_message_count: usize,
    /// Resolved batch interval in seconds
    pub batch_interval: f64,
    /// Resolved idle timeout in seconds
    pub idle_timeout: f64,
    pub oldest_pending_age: Option<f64>,
    /// Seconds since the last flush that drained anything
    pub last_flush_age: Option<f64>,
    pub metrics: QueueMetricsSnapshot,
    pub max_buffer_size_per_queue: usize,
    pub max_retry_attempts: u32,
    pub background_thread_alive: bool,
}
