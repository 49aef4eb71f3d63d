//! Bounded FIFO buffer of pending entries for one queue.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::entry::Entry;

/// Rejection returned when a push would exceed the buffer capacity.
///
/// The rejected entry is handed back so the caller decides what to do with it.
#[derive(Debug)]
pub struct BackpressureSignal {
    pub capacity: usize,
    pub entry: Entry,
}

/// Result of [`QueueBuffer::push`].
#[derive(Debug)]
#[must_use]
pub enum PushOutcome {
    /// Entry buffered; `size` is the buffer length after the push
    Accepted { size: usize },
    Rejected(BackpressureSignal),
}

impl PushOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Accepted { .. })
    }
}

/// Point-in-time view of the buffer used to evaluate flush triggers.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferTiming {
    pub size: usize,
    pub oldest_pending_at: Option<Instant>,
    pub last_enqueue_at: Option<Instant>,
}

#[derive(Debug)]
struct Buffered {
    entry: Entry,
    buffered_at: Instant,
}

#[derive(Debug, Default)]
struct BufferState {
    entries: VecDeque<Buffered>,
    last_enqueue_at: Option<Instant>,
}

/// Thread-safe ordered store of pending entries with a capacity ceiling.
///
/// Every operation takes the internal lock once and never holds it across an
/// await point, so a drain always removes a consistent prefix even when
/// producers push concurrently.
#[derive(Debug)]
pub struct QueueBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
}

impl QueueBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a producer entry, or reject it when the buffer is full.
    pub fn push(&self, entry: Entry) -> PushOutcome {
        let mut state = self.state.lock();
        if state.entries.len() >= self.capacity {
            return PushOutcome::Rejected(BackpressureSignal {
                capacity: self.capacity,
                entry,
            });
        }

        let now = Instant::now();
        state.entries.push_back(Buffered {
            entry,
            buffered_at: now,
        });
        state.last_enqueue_at = Some(now);

        PushOutcome::Accepted {
            size: state.entries.len(),
        }
    }

    /// Re-insert entries at the back of the buffer after a failed dispatch.
    ///
    /// Entries that do not fit are returned in their original order. Requeues
    /// do not count as producer activity for the idle timeout.
    pub fn requeue(&self, entries: Vec<Entry>) -> Vec<Entry> {
        if entries.is_empty() {
            return entries;
        }

        let mut state = self.state.lock();
        let room = self.capacity.saturating_sub(state.entries.len());
        let mut entries = entries.into_iter();
        let now = Instant::now();

        for entry in entries.by_ref().take(room) {
            state.entries.push_back(Buffered {
                entry,
                buffered_at: now,
            });
        }

        entries.collect()
    }

    /// Atomically remove a FIFO prefix bounded by count and total bytes.
    ///
    /// The first entry is always taken when `max_count > 0`, even if it alone
    /// exceeds `max_bytes`, so an oversized head cannot wedge the queue; the
    /// planner is responsible for dropping it.
    pub fn drain(&self, max_count: usize, max_bytes: usize) -> Vec<Entry> {
        let mut state = self.state.lock();
        let mut taken_bytes = 0usize;
        let mut take = 0usize;

        for buffered in state.entries.iter() {
            if take >= max_count {
                break;
            }
            let size = buffered.entry.size_bytes();
            if take > 0 && taken_bytes.saturating_add(size) > max_bytes {
                break;
            }
            taken_bytes = taken_bytes.saturating_add(size);
            take += 1;
        }

        state
            .entries
            .drain(..take)
            .map(|buffered| buffered.entry)
            .collect()
    }

    /// Atomically remove every buffered entry.
    ///
    /// Flushes use this and let the planner split the result into batches.
    pub fn drain_all(&self) -> Vec<Entry> {
        let mut state = self.state.lock();
        state.entries.drain(..).map(|buffered| buffered.entry).collect()
    }

    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Discard everything without dispatching; returns the number removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Age of the oldest buffered entry, if any.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .entries
            .front()
            .map(|buffered| buffered.buffered_at.elapsed())
    }

    pub fn timing(&self) -> BufferTiming {
        let state = self.state.lock();
        BufferTiming {
            size: state.entries.len(),
            oldest_pending_at: state.entries.front().map(|buffered| buffered.buffered_at),
            last_enqueue_at: state.last_enqueue_at,
        }
    }
}
