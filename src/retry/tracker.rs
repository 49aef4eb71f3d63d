//! Per-queue failure history and requeue-vs-drop decisions.
//!
//! An entry that fails with a retryable error waits here until its backoff
//! elapses, then moves to the back of its queue buffer. Its failure record is
//! kept until the entry is finally sent, dropped, or cleared.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::backoff::ExponentialBackoff;
use crate::queue::{Entry, QueueBuffer};

/// Latest retry time used when a configured delay overflows the clock.
const MAX_RETRY_HORIZON: Duration = Duration::from_secs(86400 * 365 * 30);

/// An entry waiting out its backoff delay.
#[derive(Debug)]
pub struct FailedMessage {
    pub entry: Entry,
    pub retry_count: u32,
    pub first_failure_time: Instant,
    pub last_failure_time: Instant,
    /// Earliest instant the entry may be put back into its buffer
    pub retry_at: Instant,
}

/// Outcome of recording a retryable failure.
#[derive(Debug)]
pub enum RetryDecision {
    /// Entry parked until `retry_at`
    Requeued { retry_count: u32, retry_at: Instant },
    /// Attempt limit reached; the entry is handed back to be discarded
    Exhausted {
        entry: Entry,
        retry_count: u32,
        first_failure_time: Instant,
    },
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    retry_count: u32,
    first_failure_time: Instant,
    last_failure_time: Instant,
}

#[derive(Debug, Default)]
struct TrackerState {
    waiting: VecDeque<FailedMessage>,
    /// Records of entries that were released back into the buffer
    released: HashMap<Uuid, FailureRecord>,
}

pub struct RetryTracker {
    queue_name: String,
    backoff: ExponentialBackoff,
    max_attempts: u32,
    state: Mutex<TrackerState>,
}

impl RetryTracker {
    pub fn new(queue_name: impl Into<String>, backoff: ExponentialBackoff, max_attempts: u32) -> Self {
        Self {
            queue_name: queue_name.into(),
            backoff,
            max_attempts,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record a retryable failure of `entry` at `now`.
    ///
    /// The retry count is incremented first; reaching `max_attempts` is
    /// terminal, so the count reported at drop time never exceeds the limit.
    pub fn record_failure(&self, entry: Entry, now: Instant) -> RetryDecision {
        let mut state = self.state.lock();

        let previous = state.released.remove(&entry.id());
        let retry_count = previous.map_or(0, |r| r.retry_count).saturating_add(1);
        let first_failure_time = previous.map_or(now, |r| r.first_failure_time);

        if retry_count >= self.max_attempts {
            return RetryDecision::Exhausted {
                entry,
                retry_count: retry_count.min(self.max_attempts),
                first_failure_time,
            };
        }

        let retry_at = now
            .checked_add(self.backoff.delay_for(retry_count))
            .unwrap_or_else(|| now + MAX_RETRY_HORIZON);

        tracing::debug!(
            queue = %self.queue_name,
            entry_id = %entry.id(),
            retry_count,
            delay_ms = retry_at.saturating_duration_since(now).as_millis() as u64,
            "Entry scheduled for retry"
        );

        state.waiting.push_back(FailedMessage {
            entry,
            retry_count,
            first_failure_time,
            last_failure_time: now,
            retry_at,
        });

        RetryDecision::Requeued {
            retry_count,
            retry_at,
        }
    }

    /// Forget the failure history of an entry that was sent or dropped.
    pub fn forget(&self, id: &Uuid) -> bool {
        self.state.lock().released.remove(id).is_some()
    }

    /// Move entries whose backoff has elapsed into `buffer`.
    ///
    /// Entries that do not fit stay parked and become eligible again on the
    /// next call. Returns the number of entries moved.
    pub fn release_ready(&self, buffer: &QueueBuffer, now: Instant) -> usize {
        self.release(buffer, now, |message| message.retry_at <= now)
    }

    /// Move every parked entry into `buffer`, ignoring backoff.
    pub fn release_all(&self, buffer: &QueueBuffer, now: Instant) -> usize {
        self.release(buffer, now, |_| true)
    }

    fn release(
        &self,
        buffer: &QueueBuffer,
        now: Instant,
        is_ready: impl Fn(&FailedMessage) -> bool,
    ) -> usize {
        let mut state = self.state.lock();
        if state.waiting.is_empty() {
            return 0;
        }

        let mut ready = Vec::new();
        let mut still_waiting = VecDeque::with_capacity(state.waiting.len());
        for message in state.waiting.drain(..) {
            if is_ready(&message) {
                ready.push(message);
            } else {
                still_waiting.push_back(message);
            }
        }
        state.waiting = still_waiting;

        if ready.is_empty() {
            return 0;
        }

        let mut records = HashMap::with_capacity(ready.len());
        let entries: Vec<Entry> = ready
            .into_iter()
            .map(|message| {
                records.insert(
                    message.entry.id(),
                    FailureRecord {
                        retry_count: message.retry_count,
                        first_failure_time: message.first_failure_time,
                        last_failure_time: message.last_failure_time,
                    },
                );
                message.entry
            })
            .collect();
        let offered = entries.len();

        let leftovers = buffer.requeue(entries);
        let moved = offered - leftovers.len();

        for entry in leftovers {
            if let Some(record) = records.remove(&entry.id()) {
                state.waiting.push_back(FailedMessage {
                    entry,
                    retry_count: record.retry_count,
                    first_failure_time: record.first_failure_time,
                    last_failure_time: record.last_failure_time,
                    retry_at: now,
                });
            }
        }
        state.released.extend(records);

        if moved < offered {
            tracing::warn!(
                queue = %self.queue_name,
                moved,
                deferred = offered - moved,
                "Buffer full, deferring retries"
            );
        }

        moved
    }

    /// Number of entries currently waiting out a backoff.
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Current retry count of an entry, wherever it is.
    pub fn retry_count_of(&self, id: &Uuid) -> Option<u32> {
        let state = self.state.lock();
        state.released.get(id).map(|r| r.retry_count).or_else(|| {
            state
                .waiting
                .iter()
                .find(|message| message.entry.id() == *id)
                .map(|message| message.retry_count)
        })
    }

    /// Discard parked entries and all failure history; returns the number of
    /// parked entries discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.waiting.len();
        state.waiting.clear();
        state.released.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffConfig;

    fn tracker(max_attempts: u32) -> RetryTracker {
        let backoff = ExponentialBackoff::with_config(BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        });
        RetryTracker::new("test_queue", backoff, max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_waits_for_backoff() {
        let tracker = tracker(3);
        let buffer = QueueBuffer::new(10);
        let now = Instant::now();

        match tracker.record_failure(Entry::new("x"), now) {
            RetryDecision::Requeued {
                retry_count,
                retry_at,
            } => {
                assert_eq!(retry_count, 1);
                assert_eq!(retry_at, now + Duration::from_secs(2));
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        assert_eq!(tracker.release_ready(&buffer, now + Duration::from_secs(1)), 0);
        assert_eq!(tracker.waiting_count(), 1);

        assert_eq!(tracker.release_ready(&buffer, now + Duration::from_secs(2)), 1);
        assert_eq!(tracker.waiting_count(), 0);
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_on_reaching_max_attempts() {
        let tracker = tracker(3);
        let buffer = QueueBuffer::new(10);
        let entry = Entry::new("x");
        let id = entry.id();
        let mut now = Instant::now();
        let mut entry = Some(entry);

        for attempt in 1..=3u32 {
            let decision = tracker.record_failure(entry.take().unwrap(), now);
            match decision {
                RetryDecision::Requeued { retry_count, .. } => {
                    assert!(attempt < 3);
                    assert_eq!(retry_count, attempt);
                    now += Duration::from_secs(60);
                    assert_eq!(tracker.release_ready(&buffer, now), 1);
                    assert_eq!(tracker.retry_count_of(&id), Some(attempt));
                    entry = buffer.drain_all().pop();
                }
                RetryDecision::Exhausted {
                    entry: dropped,
                    retry_count,
                    ..
                } => {
                    assert_eq!(attempt, 3);
                    assert_eq!(retry_count, 3);
                    assert_eq!(dropped.id(), id);
                }
            }
        }

        assert_eq!(tracker.waiting_count(), 0);
        assert_eq!(tracker.retry_count_of(&id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_drops_immediately() {
        let tracker = tracker(0);
        let decision = tracker.record_failure(Entry::new("x"), Instant::now());
        assert!(matches!(
            decision,
            RetryDecision::Exhausted { retry_count: 0, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_keeps_entries_parked() {
        let tracker = tracker(3);
        let buffer = QueueBuffer::new(1);
        assert!(buffer.push(Entry::new("occupant")).is_accepted());

        let now = Instant::now();
        let _ = tracker.record_failure(Entry::new("a"), now);
        let _ = tracker.record_failure(Entry::new("b"), now);

        let later = now + Duration::from_secs(10);
        assert_eq!(tracker.release_ready(&buffer, later), 0);
        assert_eq!(tracker.waiting_count(), 2);

        buffer.drain_all();
        assert_eq!(tracker.release_ready(&buffer, later), 1);
        assert_eq!(tracker.waiting_count(), 1);
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_parks_without_overflow() {
        let backoff = ExponentialBackoff::with_config(BackoffConfig {
            base_delay: Duration::from_secs_f64(1e18),
            max_delay: Duration::from_secs_f64(1e19),
            jitter_factor: 1.0,
        });
        let tracker = RetryTracker::new("test_queue", backoff, 100);
        let now = Instant::now();

        let _ = tracker.record_failure(Entry::new("a"), now);
        let buffer = QueueBuffer::new(10);
        assert_eq!(tracker.release_ready(&buffer, now + Duration::from_secs(86400)), 0);
        assert_eq!(tracker.release_all(&buffer, now), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_all_ignores_backoff() {
        let tracker = tracker(3);
        let buffer = QueueBuffer::new(10);
        let now = Instant::now();
        let _ = tracker.record_failure(Entry::new("a"), now);

        assert_eq!(tracker.release_all(&buffer, now), 1);
        assert_eq!(buffer.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_and_clear() {
        let tracker = tracker(3);
        let buffer = QueueBuffer::new(10);
        let now = Instant::now();

        let entry = Entry::new("a");
        let id = entry.id();
        let _ = tracker.record_failure(entry, now);
        let _ = tracker.record_failure(Entry::new("b"), now);
        tracker.release_all(&buffer, now);

        assert!(tracker.forget(&id));
        assert!(!tracker.forget(&id));

        let _ = tracker.record_failure(Entry::new("c"), now);
        assert_eq!(tracker.clear(), 1);
        assert_eq!(tracker.waiting_count(), 0);
    }
}
