//! Send client that accepts everything and logs what it would have sent.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::client::{BatchSendClient, EntryResult, SendClientError};
use crate::queue::Entry;

/// Dry-run client used by the binary when no real service is wired in.
#[derive(Debug, Default)]
pub struct LoggingSendClient {
    calls: AtomicU64,
}

impl LoggingSendClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BatchSendClient for LoggingSendClient {
    async fn send_batch(
        &self,
        queue_name: &str,
        entries: &[Entry],
    ) -> Result<Vec<EntryResult>, SendClientError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let bytes: usize = entries.iter().map(Entry::size_bytes).sum();
        tracing::info!(
            queue = %queue_name,
            entries = entries.len(),
            bytes,
            "Dispatching batch"
        );
        for entry in entries {
            tracing::debug!(
                queue = %queue_name,
                entry_id = %entry.id(),
                payload = %String::from_utf8_lossy(entry.payload()),
                "Batch entry"
            );
        }
        Ok(entries.iter().map(|e| EntryResult::success(e.id())).collect())
    }
}
