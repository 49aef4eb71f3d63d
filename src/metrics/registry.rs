//! Per-queue counters owned by one broker instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Counters for a single logical queue.
///
/// All fields are monotonically non-decreasing for the broker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub batches_sent: u64,
    pub batch_split_count: u64,
    pub oversized_message_dropped: u64,
    pub buffer_overflow_count: u64,
    pub retry_requeued_count: u64,
    pub retry_exhausted_count: u64,
}

/// Live counters for one queue.
///
/// Updates take the registry gate shared, snapshots take it exclusively, so a
/// registry-wide snapshot never observes half of any update.
#[derive(Debug)]
pub struct QueueMetrics {
    gate: Arc<RwLock<()>>,
    counters: Mutex<QueueMetricsSnapshot>,
}

impl QueueMetrics {
    fn new(gate: Arc<RwLock<()>>) -> Self {
        Self {
            gate,
            counters: Mutex::new(QueueMetricsSnapshot::default()),
        }
    }

    /// Apply several counter updates atomically.
    pub fn update(&self, f: impl FnOnce(&mut QueueMetricsSnapshot)) {
        let _gate = self.gate.read();
        f(&mut *self.counters.lock());
    }

    pub fn record_overflow(&self) {
        self.update(|c| c.buffer_overflow_count += 1);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        *self.counters.lock()
    }
}

/// Logical queue name to counters, created on first use.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queues: DashMap<String, Arc<QueueMetrics>>,
    gate: Arc<RwLock<()>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_queue(&self, queue_name: &str) -> Arc<QueueMetrics> {
        if let Some(existing) = self.queues.get(queue_name) {
            return existing.clone();
        }
        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(QueueMetrics::new(self.gate.clone())))
            .clone()
    }

    pub fn get(&self, queue_name: &str) -> Option<QueueMetricsSnapshot> {
        self.queues.get(queue_name).map(|m| m.snapshot())
    }

    /// Point-in-time copy of every queue's counters.
    pub fn snapshot(&self) -> BTreeMap<String, QueueMetricsSnapshot> {
        let _gate = self.gate.write();
        self.queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
