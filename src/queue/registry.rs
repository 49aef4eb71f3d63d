//! Lazily created per-queue state.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::buffer::QueueBuffer;
use crate::config::{QueuePolicy, ResolvedConfig};
use crate::metrics::{MetricsRegistry, QueueMetrics};
use crate::retry::{BackoffConfig, ExponentialBackoff, RetryTracker};

/// Everything the broker keeps for one logical queue.
///
/// The policy is resolved once at creation and never changes.
pub struct QueueSlot {
    name: String,
    physical_name: String,
    policy: QueuePolicy,
    buffer: QueueBuffer,
    retries: RetryTracker,
    metrics: Arc<QueueMetrics>,
    /// Held for the whole of a flush; at most one flush per queue at a time
    flush_lock: tokio::sync::Mutex<()>,
    last_flush: Mutex<Option<Instant>>,
}

impl QueueSlot {
    fn new(name: &str, config: &ResolvedConfig, metrics: Arc<QueueMetrics>) -> Self {
        let backoff = ExponentialBackoff::with_config(BackoffConfig {
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            jitter_factor: config.retry_jitter_factor,
        });

        Self {
            name: name.to_string(),
            physical_name: config.physical_name(name),
            policy: config.policy_for(name),
            buffer: QueueBuffer::new(config.max_buffer_size_per_queue),
            retries: RetryTracker::new(name, backoff, config.max_retry_attempts),
            metrics,
            flush_lock: tokio::sync::Mutex::new(()),
            last_flush: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name passed to the send client (namespace applied).
    pub fn physical_name(&self) -> &str {
        &self.physical_name
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn buffer(&self) -> &QueueBuffer {
        &self.buffer
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn flush_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.flush_lock
    }

    pub fn last_flush(&self) -> Option<Instant> {
        *self.last_flush.lock()
    }

    pub fn mark_flushed(&self, at: Instant) {
        *self.last_flush.lock() = Some(at);
    }

    /// Buffered entries plus entries parked for retry.
    pub fn pending_count(&self) -> usize {
        self.buffer.size() + self.retries.waiting_count()
    }
}

/// Concurrent map of logical queue name to its slot.
pub struct QueueRegistry {
    slots: DashMap<String, Arc<QueueSlot>>,
    config: Arc<ResolvedConfig>,
    metrics: Arc<MetricsRegistry>,
}

impl QueueRegistry {
    pub fn new(config: Arc<ResolvedConfig>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            slots: DashMap::new(),
            config,
            metrics,
        }
    }

    /// Get the slot for `queue_name`, creating it on first reference.
    pub fn get_or_create(&self, queue_name: &str) -> Arc<QueueSlot> {
        if let Some(slot) = self.slots.get(queue_name) {
            return slot.clone();
        }

        self.slots
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                let policy = self.config.policy_for(queue_name);
                tracing::debug!(
                    queue = %queue_name,
                    batch_interval_ms = policy.batch_interval.as_millis() as u64,
                    idle_timeout_ms = policy.idle_timeout.as_millis() as u64,
                    "Queue created"
                );
                Arc::new(QueueSlot::new(
                    queue_name,
                    &self.config,
                    self.metrics.for_queue(queue_name),
                ))
            })
            .clone()
    }

    pub fn get(&self, queue_name: &str) -> Option<Arc<QueueSlot>> {
        self.slots.get(queue_name).map(|slot| slot.clone())
    }

    /// Snapshot of all slots, collected so no map shard stays locked.
    pub fn slots(&self) -> Vec<Arc<QueueSlot>> {
        self.slots.iter().map(|slot| slot.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total entries buffered or parked across all queues.
    pub fn total_pending(&self) -> usize {
        self.slots.iter().map(|slot| slot.pending_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn registry() -> QueueRegistry {
        let config = BrokerConfig {
            namespace: "dev-".to_string(),
            group_batch_intervals: HashMap::from([("slow".to_string(), 5.0)]),
            ..BrokerConfig::default()
        };
        QueueRegistry::new(
            Arc::new(config.resolve().unwrap()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_get_or_create_reuses_slot() {
        let registry = registry();
        let a = registry.get_or_create("orders");
        let b = registry.get_or_create("orders");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_slot_resolves_name_and_policy() {
        let registry = registry();
        let slow = registry.get_or_create("slow");
        assert_eq!(slow.physical_name(), "dev-slow");
        assert_eq!(slow.policy().batch_interval, Duration::from_secs(5));

        let other = registry.get_or_create("other");
        assert_eq!(other.policy().batch_interval, Duration::from_secs(1));
        assert_eq!(other.buffer().capacity(), 5000);
        assert_eq!(other.retries().max_attempts(), 3);
    }

    #[test]
    fn test_total_pending_sums_buffers() {
        let registry = registry();
        let a = registry.get_or_create("a");
        let b = registry.get_or_create("b");
        assert!(a.buffer().push(crate::queue::Entry::new("x")).is_accepted());
        assert!(b.buffer().push(crate::queue::Entry::new("y")).is_accepted());
        assert!(b.buffer().push(crate::queue::Entry::new("z")).is_accepted());
        assert_eq!(registry.total_pending(), 3);
        assert_eq!(registry.slots().len(), 2);
    }
}
