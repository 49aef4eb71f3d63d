//! Background flush scheduler.
//!
//! One task per broker. Every poll interval (or earlier, when woken by a
//! producer that filled a batch) it moves due retries back into their buffers,
//! evaluates each queue's flush triggers and flushes the due queues
//! concurrently. On shutdown it runs one last pass over all queues.

mod trigger;

pub use trigger::{evaluate_trigger, FlushTrigger};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broker::engine::{BrokerCore, FlushMode};
use crate::queue::QueueSlot;

/// Background task that drives time- and size-based flushes
pub(crate) struct FlushScheduler {
    core: Arc<BrokerCore>,
    poll_interval: Duration,
    wake: Arc<Notify>,
    shutdown: broadcast::Receiver<()>,
    /// One task per queue flush started by this scheduler
    in_flight: JoinSet<()>,
}

impl FlushScheduler {
    pub fn new(
        core: Arc<BrokerCore>,
        wake: Arc<Notify>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            poll_interval: core.config().poll_interval,
            core,
            wake,
            shutdown,
            in_flight: JoinSet::new(),
        }
    }

    /// Run until the shutdown signal fires or its sender is dropped
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        ticker.tick().await;

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Flush scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Flush scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = self.wake.notified() => {
                    self.tick();
                }
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Scheduled flush task failed");
                    }
                }
            }
        }

        self.final_pass().await;
        while self.in_flight.join_next().await.is_some() {}
        tracing::info!("Flush scheduler stopped");
    }

    /// Start a flush task for every due queue without waiting for any of them.
    ///
    /// A queue whose previous flush is still sending is skipped by the flush
    /// lock, so a stalled send only delays its own queue.
    fn tick(&mut self) {
        let now = Instant::now();
        let batch_size = self.core.config().batch_size;

        for slot in self.core.queues().slots() {
            slot.retries().release_ready(slot.buffer(), now);
            let Some(trigger) =
                evaluate_trigger(&slot.buffer().timing(), slot.policy(), batch_size, now)
            else {
                continue;
            };
            self.in_flight
                .spawn(flush_guarded(self.core.clone(), slot, trigger));
        }
    }

    async fn final_pass(&self) {
        let flush = self.core.flush_all(FlushMode::Regular);
        match AssertUnwindSafe(flush).catch_unwind().await {
            Ok(reports) => {
                let sent: usize = reports.iter().map(|r| r.sent).sum();
                tracing::info!(
                    queues = reports.len(),
                    sent,
                    "Flush scheduler final pass completed"
                );
            }
            Err(panic) => {
                tracing::error!(
                    panic = %panic_message(panic.as_ref()),
                    "Flush scheduler final pass panicked"
                );
            }
        }
    }
}

/// Flush one queue, skipping it when a flush is already in flight and
/// containing any panic so the scheduler keeps running.
async fn flush_guarded(core: Arc<BrokerCore>, slot: Arc<QueueSlot>, trigger: FlushTrigger) {
    let flush = core.try_flush_slot(&slot, FlushMode::Regular);
    match AssertUnwindSafe(flush).catch_unwind().await {
        Ok(Some(report)) => {
            tracing::debug!(
                queue = %slot.name(),
                trigger = trigger.as_str(),
                sent = report.sent,
                batches = report.batches,
                "Scheduled flush completed"
            );
        }
        Ok(None) => {
            tracing::trace!(queue = %slot.name(), "Flush already in progress, skipping");
        }
        Err(panic) => {
            tracing::error!(
                queue = %slot.name(),
                trigger = trigger.as_str(),
                panic = %panic_message(panic.as_ref()),
                "Scheduled flush panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
