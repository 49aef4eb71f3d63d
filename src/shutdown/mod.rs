//! Graceful shutdown of a broker.
//!
//! The shutdown sequence:
//! 1. Signals the flush scheduler to stop
//! 2. Flushes every queue one last time, retries included regardless of backoff
//! 3. Waits (bounded) for the scheduler task to finish its final pass
//! 4. Reports anything that could not be delivered

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::broker::engine::{BrokerCore, FlushMode, FlushReport};

/// Result of a graceful shutdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Per-queue outcome of the final flush
    pub flushed: Vec<FlushReport>,
    /// Entries delivered during the final flush
    pub entries_sent: usize,
    /// Entries still buffered or parked after shutdown; they are lost
    pub entries_lost: usize,
    /// Whether the scheduler task finished within the timeout
    pub scheduler_joined: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ShutdownReport {
    /// Nothing was left behind
    pub fn is_clean(&self) -> bool {
        self.entries_lost == 0 && self.scheduler_joined
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Drives the shutdown sequence for one broker
pub(crate) struct GracefulShutdown {
    core: Arc<BrokerCore>,
    shutdown_tx: broadcast::Sender<()>,
    scheduler: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(
        core: Arc<BrokerCore>,
        shutdown_tx: broadcast::Sender<()>,
        scheduler: Option<JoinHandle<()>>,
    ) -> Self {
        let join_timeout = core.config().shutdown_timeout;
        Self {
            core,
            shutdown_tx,
            scheduler,
            join_timeout,
        }
    }

    #[tracing::instrument(name = "broker_shutdown", skip(self), fields(queues = self.core.queues().len()))]
    pub async fn execute(mut self) -> ShutdownReport {
        let start = Instant::now();
        let mut report = ShutdownReport::default();

        // Phase 1: stop the scheduler loop
        tracing::info!("Starting broker shutdown - Phase 1: Signaling flush scheduler");
        let _ = self.shutdown_tx.send(());

        // Phase 2: final flush of every queue
        tracing::info!("Phase 2: Flushing all queues");
        report.flushed = self.core.flush_all(FlushMode::Final).await;
        report.entries_sent = report.flushed.iter().map(|r| r.sent).sum();

        // Phase 3: wait for the scheduler to exit
        tracing::info!("Phase 3: Waiting for flush scheduler to stop");
        report.scheduler_joined = self.join_scheduler().await;

        report.entries_lost = self.core.queues().total_pending();
        report.duration = start.elapsed();

        if report.entries_lost > 0 {
            tracing::warn!(
                entries_lost = report.entries_lost,
                "Entries remain after shutdown and will be lost"
            );
        }

        tracing::info!(
            entries_sent = report.entries_sent,
            entries_lost = report.entries_lost,
            scheduler_joined = report.scheduler_joined,
            duration_ms = report.duration.as_millis() as u64,
            "Broker shutdown completed"
        );

        report
    }

    async fn join_scheduler(&mut self) -> bool {
        let Some(mut handle) = self.scheduler.take() else {
            return true;
        };

        match timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Flush scheduler task failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Flush scheduler did not stop in time, aborting it"
                );
                handle.abort();
                false
            }
        }
    }
}
