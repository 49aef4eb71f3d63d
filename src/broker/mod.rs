//! Public broker facade.
//!
//! [`BatchBroker`] buffers entries per logical queue and dispatches them in
//! service-valid batches, either when the background scheduler finds a queue
//! due or when a caller forces a flush.
//!
//! # Example
//!
//! ```rust,ignore
//! let broker = BatchBroker::new(BrokerConfig::default(), Arc::new(client))?;
//!
//! broker.enqueue("orders", r#"{"id":1}"#).await?;
//! broker.force_flush_queue("orders").await;
//!
//! let report = broker.close().await;
//! ```

pub(crate) mod engine;
mod status;

pub use engine::{FlushMode, FlushReport};
pub use status::{BrokerMetricsSnapshot, QueueStatus};

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::dispatch::BatchSendClient;
use crate::error::{BrokerError, Result};
use crate::metrics::BufferMetrics;
use crate::queue::{Entry, PushOutcome};
use crate::scheduler::FlushScheduler;
use crate::shutdown::{GracefulShutdown, ShutdownReport};
use engine::BrokerCore;

/// Buffering batch broker for quota-limited message queues.
///
/// # Thread Safety
///
/// All methods take `&self`; share the broker behind an `Arc` between
/// producers. Unrelated queues never contend on the same lock.
pub struct BatchBroker {
    core: Arc<BrokerCore>,
    /// `true` once `close()` has begun; enqueues hold the read side while pushing
    closed: RwLock<bool>,
    shutdown_tx: broadcast::Sender<()>,
    wake: Arc<Notify>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    /// Serializes `close()` and remembers its outcome
    close_report: tokio::sync::Mutex<Option<ShutdownReport>>,
}

impl BatchBroker {
    /// Validate `config` and start the flush scheduler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BrokerConfig, client: Arc<dyn BatchSendClient>) -> Result<Self> {
        let config = config.resolve()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BrokerError::NoRuntime)?;

        let core = Arc::new(BrokerCore::new(config, client));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let wake = Arc::new(Notify::new());

        let scheduler = FlushScheduler::new(core.clone(), wake.clone(), shutdown_rx);
        let handle = runtime.spawn(scheduler.run());

        tracing::info!(
            namespace = %core.config().namespace,
            batch_size = core.config().batch_size,
            max_buffer_size_per_queue = core.config().max_buffer_size_per_queue,
            max_retry_attempts = core.config().max_retry_attempts,
            "Batch broker started"
        );

        Ok(Self {
            core,
            closed: RwLock::new(false),
            shutdown_tx,
            wake,
            scheduler: Mutex::new(Some(handle)),
            close_report: tokio::sync::Mutex::new(None),
        })
    }

    /// Buffer `payload` for `queue_name` and return the entry id.
    ///
    /// Fails immediately with [`BrokerError::BackpressureRejected`] when the
    /// queue buffer is full and with [`BrokerError::ShutdownRejected`] once
    /// `close()` has begun. Queues whose batch interval is zero are flushed
    /// before this returns.
    pub async fn enqueue(&self, queue_name: &str, payload: impl Into<Bytes>) -> Result<Uuid> {
        let (slot, id) = {
            let closed = self.closed.read();
            if *closed {
                return Err(BrokerError::ShutdownRejected {
                    queue: queue_name.to_string(),
                });
            }

            let slot = self.core.queues().get_or_create(queue_name);
            let entry = Entry::new(payload);
            let id = entry.id();

            match slot.buffer().push(entry) {
                PushOutcome::Accepted { size } => {
                    BufferMetrics::record_enqueued(queue_name, size);
                    if size >= self.core.config().batch_size {
                        self.wake.notify_one();
                    }
                }
                PushOutcome::Rejected(signal) => {
                    slot.metrics().record_overflow();
                    BufferMetrics::record_rejected(queue_name);
                    tracing::warn!(
                        queue = %queue_name,
                        capacity = signal.capacity,
                        entry_id = %signal.entry.id(),
                        "Buffer full, rejecting enqueue"
                    );
                    return Err(BrokerError::BackpressureRejected {
                        queue: queue_name.to_string(),
                        capacity: signal.capacity,
                    });
                }
            }

            (slot, id)
        };

        if slot.policy().batch_interval.is_zero() {
            self.core.flush_slot(&slot, FlushMode::Regular).await;
        }

        Ok(id)
    }

    /// Flush one queue now, waiting for an in-flight flush on it to finish first.
    pub async fn force_flush_queue(&self, queue_name: &str) -> FlushReport {
        self.core.flush_queue(queue_name, FlushMode::Regular).await
    }

    /// Flush every known queue now.
    pub async fn flush_all(&self) -> Vec<FlushReport> {
        self.core.flush_all(FlushMode::Regular).await
    }

    /// Discard everything pending for a queue without dispatching it.
    ///
    /// Returns the number of buffered plus retry-waiting entries removed.
    pub fn clear_queue_buffer(&self, queue_name: &str) -> usize {
        self.core.clear(queue_name)
    }

    pub fn get_metrics(&self) -> BrokerMetricsSnapshot {
        self.core.metrics_snapshot(self.scheduler_alive())
    }

    pub fn get_queue_status(&self, queue_name: &str) -> QueueStatus {
        self.core.queue_status(queue_name, self.scheduler_alive())
    }

    /// Whether new work is accepted.
    pub fn is_running(&self) -> bool {
        !*self.closed.read()
    }

    fn scheduler_alive(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop accepting work, flush everything and stop the scheduler.
    ///
    /// Idempotent: later and concurrent calls wait for the first one and
    /// return its report.
    pub async fn close(&self) -> ShutdownReport {
        let mut close_report = self.close_report.lock().await;
        if let Some(report) = close_report.as_ref() {
            return report.clone();
        }

        *self.closed.write() = true;

        let scheduler = self.scheduler.lock().take();
        let report =
            GracefulShutdown::new(self.core.clone(), self.shutdown_tx.clone(), scheduler)
                .execute()
                .await;

        *close_report = Some(report.clone());
        report
    }
}

impl Drop for BatchBroker {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            tracing::warn!(
                pending = self.core.queues().total_pending(),
                "Batch broker dropped without close, scheduler will run a final flush"
            );
            let _ = self.shutdown_tx.send(());
        }
    }
}
