//! Greedy, order-preserving batch planning.
//!
//! Entries are walked once in FIFO order and appended to the current batch
//! until either the count or the byte limit would be exceeded, at which point
//! a new batch is opened. Entries too large to ever be sent are set aside.

use crate::queue::Entry;

/// Limits a planned batch must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerLimits {
    pub max_count: usize,
    pub max_batch_bytes: usize,
    pub max_entry_bytes: usize,
}

impl PlannerLimits {
    /// Build limits, clamping the single-entry ceiling to the batch budget
    /// and the count to at least one.
    pub fn new(max_count: usize, max_batch_bytes: usize, max_entry_bytes: usize) -> Self {
        Self {
            max_count: max_count.max(1),
            max_batch_bytes,
            max_entry_bytes: max_entry_bytes.min(max_batch_bytes),
        }
    }
}

/// An ordered group of entries sent in one dispatch call.
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<Entry>,
    total_bytes: usize,
}

impl Batch {
    fn push(&mut self, entry: Entry) {
        self.total_bytes += entry.size_bytes();
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

/// Result of planning one drained list.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Entries excluded because they exceed the single-entry ceiling
    pub oversized: Vec<Entry>,
}

impl BatchPlan {
    /// Number of extra batches caused by splitting one drain.
    pub fn split_count(&self) -> usize {
        self.batches.len().saturating_sub(1)
    }

    pub fn entry_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Split `entries` into batches that satisfy `limits`.
///
/// The concatenation of the returned batches equals the input minus the
/// oversized entries, in the same order.
pub fn plan_batches(entries: Vec<Entry>, limits: &PlannerLimits) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut current = Batch::default();

    for entry in entries {
        let size = entry.size_bytes();
        if size > limits.max_entry_bytes {
            plan.oversized.push(entry);
            continue;
        }

        let fits = current.len() < limits.max_count
            && current.total_bytes + size <= limits.max_batch_bytes;
        if !fits && !current.is_empty() {
            plan.batches.push(std::mem::take(&mut current));
        }
        current.push(entry);
    }

    if !current.is_empty() {
        plan.batches.push(current);
    }

    plan
}
