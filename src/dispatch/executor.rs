//! Sends one planned batch and classifies each entry's outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::client::{BatchSendClient, DispatchErrorKind, EntryFailure, SendClientError};
use crate::batch::Batch;
use crate::metrics::DispatchMetrics;
use crate::queue::Entry;

/// Why one entry was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub kind: DispatchErrorKind,
    pub code: String,
    pub message: String,
}

impl DispatchFailure {
    fn retryable(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: DispatchErrorKind::Retryable,
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn from_entry(failure: EntryFailure) -> Self {
        Self {
            kind: DispatchErrorKind::classify(&failure.code, failure.sender_fault),
            code: failure.code,
            message: failure.message,
        }
    }

    fn from_call(err: &SendClientError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Partition of one batch into accepted and failed entries.
///
/// Every entry of the batch appears in exactly one of the two lists.
#[derive(Debug, Default)]
pub struct SendResult {
    pub succeeded: Vec<Entry>,
    pub failed: Vec<(Entry, DispatchFailure)>,
}

impl SendResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Wraps the send client with a timeout and per-entry classification.
#[derive(Clone)]
pub struct DispatchExecutor {
    client: Arc<dyn BatchSendClient>,
    send_timeout: Duration,
}

impl DispatchExecutor {
    pub fn new(client: Arc<dyn BatchSendClient>, send_timeout: Duration) -> Self {
        Self {
            client,
            send_timeout,
        }
    }

    /// Send `batch` to `physical_queue`.
    ///
    /// `queue_label` names the logical queue for logs and metrics. Never
    /// returns an error: call-level failures are applied to every entry.
    pub async fn send(&self, queue_label: &str, physical_queue: &str, batch: Batch) -> SendResult {
        let entries = batch.into_entries();
        if entries.is_empty() {
            return SendResult::default();
        }

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.send_timeout, self.client.send_batch(physical_queue, &entries))
                .await;
        DispatchMetrics::record_batch(queue_label, started.elapsed());

        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(err)) => {
                tracing::warn!(
                    queue = %queue_label,
                    code = %err.code(),
                    error = %err,
                    entries = entries.len(),
                    "Batch send call failed"
                );
                let failure = DispatchFailure::from_call(&err);
                return SendResult {
                    succeeded: Vec::new(),
                    failed: entries.into_iter().map(|e| (e, failure.clone())).collect(),
                };
            }
            Err(_) => {
                tracing::warn!(
                    queue = %queue_label,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    entries = entries.len(),
                    "Batch send call timed out"
                );
                let failure = DispatchFailure::retryable("Timeout", "send call timed out");
                return SendResult {
                    succeeded: Vec::new(),
                    failed: entries.into_iter().map(|e| (e, failure.clone())).collect(),
                };
            }
        };

        let mut by_id: HashMap<Uuid, Result<(), EntryFailure>> = results
            .into_iter()
            .map(|result| (result.id, result.outcome))
            .collect();

        let mut sent = SendResult::default();
        for entry in entries {
            match by_id.remove(&entry.id()) {
                Some(Ok(())) => sent.succeeded.push(entry),
                Some(Err(failure)) => {
                    sent.failed.push((entry, DispatchFailure::from_entry(failure)));
                }
                None => sent.failed.push((
                    entry,
                    DispatchFailure::retryable("MissingResult", "no result reported for entry"),
                )),
            }
        }

        if !by_id.is_empty() {
            tracing::warn!(
                queue = %queue_label,
                unknown = by_id.len(),
                "Send client reported results for unknown entry ids"
            );
        }

        sent
    }
}
