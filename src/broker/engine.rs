//! Shared broker state and the per-queue flush procedure.
//!
//! The facade and the scheduler task both hold an `Arc<BrokerCore>`; every
//! flush, whoever triggers it, goes through [`BrokerCore::flush_slot`] or
//! [`BrokerCore::try_flush_slot`].

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;

use super::status::{BrokerMetricsSnapshot, QueueStatus};
use crate::batch::{plan_batches, BatchPlan, PlannerLimits};
use crate::config::ResolvedConfig;
use crate::dispatch::{BatchSendClient, DispatchErrorKind, DispatchExecutor};
use crate::metrics::{BufferMetrics, DispatchMetrics, MetricsRegistry, RetryMetrics};
use crate::queue::{QueueRegistry, QueueSlot};
use crate::retry::RetryDecision;

/// How parked retries are treated at the start of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Only entries whose backoff has elapsed rejoin the buffer
    Regular,
    /// Every parked entry rejoins the buffer for one last attempt
    Final,
}

/// Outcome of flushing one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub queue: String,
    /// Entries taken out of the buffer
    pub drained: usize,
    pub batches: usize,
    pub sent: usize,
    /// Dropped on a non-retryable failure
    pub failed: usize,
    /// Parked in the retry tracker
    pub requeued: usize,
    /// Dropped after reaching the retry limit
    pub exhausted: usize,
    pub oversized: usize,
}

impl FlushReport {
    fn empty(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            ..Default::default()
        }
    }

    /// Entries permanently discarded by this flush.
    pub fn dropped(&self) -> usize {
        self.failed + self.exhausted + self.oversized
    }
}

pub(crate) struct BrokerCore {
    config: Arc<ResolvedConfig>,
    queues: QueueRegistry,
    metrics: Arc<MetricsRegistry>,
    executor: DispatchExecutor,
    limits: PlannerLimits,
}

impl BrokerCore {
    pub fn new(config: ResolvedConfig, client: Arc<dyn BatchSendClient>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsRegistry::new());
        let limits = PlannerLimits::new(
            config.batch_size,
            config.batch_byte_budget,
            config.max_entry_bytes,
        );

        Self {
            queues: QueueRegistry::new(config.clone(), metrics.clone()),
            executor: DispatchExecutor::new(client, config.send_timeout),
            config,
            metrics,
            limits,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    /// Flush one queue, waiting for any flush already in progress on it.
    pub async fn flush_slot(&self, slot: &QueueSlot, mode: FlushMode) -> FlushReport {
        let _guard = slot.flush_lock().lock().await;
        self.flush_locked(slot, mode).await
    }

    /// Flush one queue unless a flush is already running on it.
    pub async fn try_flush_slot(&self, slot: &QueueSlot, mode: FlushMode) -> Option<FlushReport> {
        let _guard = slot.flush_lock().try_lock().ok()?;
        Some(self.flush_locked(slot, mode).await)
    }

    /// Flush a queue by name; unknown queues have nothing to flush.
    pub async fn flush_queue(&self, queue_name: &str, mode: FlushMode) -> FlushReport {
        match self.queues.get(queue_name) {
            Some(slot) => self.flush_slot(&slot, mode).await,
            None => FlushReport::empty(queue_name),
        }
    }

    /// Flush every known queue concurrently.
    pub async fn flush_all(&self, mode: FlushMode) -> Vec<FlushReport> {
        let slots = self.queues.slots();
        join_all(slots.iter().map(|slot| self.flush_slot(slot, mode))).await
    }

    #[tracing::instrument(name = "flush_queue", skip(self, slot), fields(queue = %slot.name()))]
    async fn flush_locked(&self, slot: &QueueSlot, mode: FlushMode) -> FlushReport {
        let queue = slot.name();
        let now = Instant::now();

        match mode {
            FlushMode::Regular => slot.retries().release_ready(slot.buffer(), now),
            FlushMode::Final => slot.retries().release_all(slot.buffer(), now),
        };

        // Whole buffer in one drain; the planner does the splitting
        let entries = slot.buffer().drain_all();
        if entries.is_empty() {
            return FlushReport::empty(queue);
        }

        let mut report = FlushReport::empty(queue);
        report.drained = entries.len();

        let BatchPlan { batches, oversized } = plan_batches(entries, &self.limits);
        let splits = batches.len().saturating_sub(1);
        report.batches = batches.len();
        report.oversized = oversized.len();

        for entry in oversized {
            slot.retries().forget(&entry.id());
            tracing::warn!(
                queue = %queue,
                entry_id = %entry.id(),
                size_bytes = entry.size_bytes(),
                limit = self.limits.max_entry_bytes,
                "Dropping oversized entry"
            );
        }

        for batch in batches {
            let result = self
                .executor
                .send(queue, slot.physical_name(), batch)
                .await;

            for entry in &result.succeeded {
                slot.retries().forget(&entry.id());
            }
            report.sent += result.succeeded.len();

            for (entry, failure) in result.failed {
                match failure.kind {
                    DispatchErrorKind::NonRetryable => {
                        slot.retries().forget(&entry.id());
                        report.failed += 1;
                        tracing::warn!(
                            queue = %queue,
                            entry_id = %entry.id(),
                            code = %failure.code,
                            error = %failure.message,
                            "Dropping entry after non-retryable failure"
                        );
                    }
                    DispatchErrorKind::Retryable => {
                        match slot.retries().record_failure(entry, Instant::now()) {
                            RetryDecision::Requeued { .. } => report.requeued += 1,
                            RetryDecision::Exhausted {
                                entry,
                                retry_count,
                                first_failure_time,
                            } => {
                                report.exhausted += 1;
                                tracing::error!(
                                    queue = %queue,
                                    entry_id = %entry.id(),
                                    retry_count,
                                    code = %failure.code,
                                    failing_for_ms = first_failure_time.elapsed().as_millis() as u64,
                                    "Dropping entry after exhausting retries"
                                );
                            }
                        }
                    }
                }
            }
        }

        slot.metrics().update(|c| {
            c.messages_sent += report.sent as u64;
            c.messages_failed += (report.failed + report.exhausted) as u64;
            c.batches_sent += report.batches as u64;
            c.batch_split_count += splits as u64;
            c.oversized_message_dropped += report.oversized as u64;
            c.retry_requeued_count += report.requeued as u64;
            c.retry_exhausted_count += report.exhausted as u64;
        });
        DispatchMetrics::record_sent(queue, report.sent);
        DispatchMetrics::record_non_retryable(queue, report.failed);
        DispatchMetrics::record_splits(queue, splits);
        DispatchMetrics::record_oversized(queue, report.oversized);
        RetryMetrics::record_requeued(queue, report.requeued);
        RetryMetrics::record_exhausted(queue, report.exhausted);
        BufferMetrics::set_buffered(queue, slot.buffer().size());

        slot.mark_flushed(Instant::now());

        tracing::debug!(
            queue = %queue,
            drained = report.drained,
            batches = report.batches,
            sent = report.sent,
            requeued = report.requeued,
            dropped = report.dropped(),
            "Queue flushed"
        );

        report
    }

    /// Discard buffered and retry-parked entries without dispatching them.
    pub fn clear(&self, queue_name: &str) -> usize {
        let Some(slot) = self.queues.get(queue_name) else {
            return 0;
        };

        let parked = slot.retries().clear();
        let buffered = slot.buffer().clear();
        let cleared = parked + buffered;
        BufferMetrics::record_cleared(queue_name, cleared);

        tracing::warn!(
            queue = %queue_name,
            buffered,
            parked,
            "Queue buffer cleared"
        );

        cleared
    }

    pub fn queue_status(&self, queue_name: &str, scheduler_alive: bool) -> QueueStatus {
        let policy = self.config.policy_for(queue_name);
        let mut status = QueueStatus {
            queue_name: queue_name.to_string(),
            buffer_size: 0,
            failed_message_count: 0,
            batch_interval: policy.batch_interval.as_secs_f64(),
            idle_timeout: policy.idle_timeout.as_secs_f64(),
            oldest_pending_age: None,
            last_flush_age: None,
            metrics: Default::default(),
            max_buffer_size_per_queue: self.config.max_buffer_size_per_queue,
            max_retry_attempts: self.config.max_retry_attempts,
            background_thread_alive: scheduler_alive,
        };

        if let Some(slot) = self.queues.get(queue_name) {
            status.buffer_size = slot.buffer().size();
            status.failed_message_count = slot.retries().waiting_count();
            status.oldest_pending_age = slot.buffer().oldest_pending_age().map(|d| d.as_secs_f64());
            status.last_flush_age = slot.last_flush().map(|at| at.elapsed().as_secs_f64());
            status.metrics = slot.metrics().snapshot();
        }

        status
    }

    pub fn metrics_snapshot(&self, scheduler_alive: bool) -> BrokerMetricsSnapshot {
        let metrics = self.metrics.snapshot();
        let mut snapshot = BrokerMetricsSnapshot {
            buffer_sizes: Default::default(),
            failed_message_counts: Default::default(),
            metrics,
            max_buffer_size_per_queue: self.config.max_buffer_size_per_queue,
            max_retry_attempts: self.config.max_retry_attempts,
            background_thread_alive: scheduler_alive,
        };

        for slot in self.queues.slots() {
            snapshot
                .buffer_sizes
                .insert(slot.name().to_string(), slot.buffer().size());
            snapshot
                .failed_message_counts
                .insert(slot.name().to_string(), slot.retries().waiting_count());
        }

        snapshot
    }
}
