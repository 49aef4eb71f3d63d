//! Flush trigger evaluation.

use serde::Serialize;
use tokio::time::Instant;

use crate::config::QueuePolicy;
use crate::queue::BufferTiming;

/// Why the scheduler decided to flush a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Buffer holds at least a full batch
    BatchSize,
    /// Oldest pending entry has waited the full batch interval
    BatchInterval,
    /// No producer activity for the idle timeout
    IdleTimeout,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::BatchSize => "batch_size",
            FlushTrigger::BatchInterval => "batch_interval",
            FlushTrigger::IdleTimeout => "idle_timeout",
        }
    }
}

/// Decide whether a queue is due for a flush at `now`.
///
/// An empty buffer never triggers. Otherwise the first matching condition wins,
/// checked in the order size, interval, idle.
pub fn evaluate_trigger(
    timing: &BufferTiming,
    policy: QueuePolicy,
    batch_size: usize,
    now: Instant,
) -> Option<FlushTrigger> {
    if timing.size == 0 {
        return None;
    }

    if timing.size >= batch_size {
        return Some(FlushTrigger::BatchSize);
    }

    if let Some(oldest) = timing.oldest_pending_at {
        if now.saturating_duration_since(oldest) >= policy.batch_interval {
            return Some(FlushTrigger::BatchInterval);
        }
    }

    // Entries moved back from the retry tracker may be buffered with no
    // producer activity recorded yet.
    let quiet_since = timing.last_enqueue_at.or(timing.oldest_pending_at)?;
    if now.saturating_duration_since(quiet_since) >= policy.idle_timeout {
        return Some(FlushTrigger::IdleTimeout);
    }

    None
}
