//! Interface to the external batch-send collaborator.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::queue::Entry;

/// Error codes that indicate a transient condition worth retrying.
const RETRYABLE_CODES: &[&str] = &[
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "ThrottlingException",
    "Throttling",
    "RequestThrottled",
    "KmsThrottled",
    "OverLimit",
    "RequestTimeout",
    "Timeout",
    "TransportError",
    "MissingResult",
];

/// Error codes that will fail again no matter how often they are retried.
const NON_RETRYABLE_CODES: &[&str] = &[
    "InvalidMessageContents",
    "MessageTooLong",
    "BatchRequestTooLong",
    "BatchEntryIdsNotDistinct",
    "InvalidBatchEntryId",
    "TooManyEntriesInBatchRequest",
    "EmptyBatchRequest",
    "InvalidParameterValue",
    "AccessDenied",
    "AccessDeniedException",
    "InvalidSecurity",
    "NonExistentQueue",
    "QueueDoesNotExist",
    "UnsupportedOperation",
];

/// How a dispatch failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// Transient (network, throttling); goes through the retry tracker
    Retryable,
    /// Permanent (malformed, oversized at the service, authorization); dropped
    NonRetryable,
}

impl DispatchErrorKind {
    /// Classify a collaborator-supplied error code.
    ///
    /// Codes may carry a vendor prefix such as `AWS.SimpleQueueService.`.
    /// Unknown codes fall back to the sender-fault flag.
    pub fn classify(code: &str, sender_fault: bool) -> Self {
        let code = code.rsplit('.').next().unwrap_or(code);
        if RETRYABLE_CODES.contains(&code) {
            DispatchErrorKind::Retryable
        } else if NON_RETRYABLE_CODES.contains(&code) || sender_fault {
            DispatchErrorKind::NonRetryable
        } else {
            DispatchErrorKind::Retryable
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchErrorKind::Retryable)
    }
}

/// Per-entry failure reported by the send client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub code: String,
    pub message: String,
    /// Whether the service blames the request rather than itself
    pub sender_fault: bool,
}

/// Per-entry result of one batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryResult {
    pub id: Uuid,
    pub outcome: Result<(), EntryFailure>,
}

impl EntryResult {
    pub fn success(id: Uuid) -> Self {
        Self { id, outcome: Ok(()) }
    }

    pub fn failure(
        id: Uuid,
        code: impl Into<String>,
        message: impl Into<String>,
        sender_fault: bool,
    ) -> Self {
        Self {
            id,
            outcome: Err(EntryFailure {
                code: code.into(),
                message: message.into(),
                sender_fault,
            }),
        }
    }
}

/// The whole send call failed; no entry was accepted.
#[derive(Debug, Clone, Error)]
pub enum SendClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error {code}: {message}")]
    Service {
        code: String,
        message: String,
        sender_fault: bool,
    },
}

impl SendClientError {
    pub fn code(&self) -> &str {
        match self {
            SendClientError::Transport(_) => "TransportError",
            SendClientError::Service { code, .. } => code,
        }
    }

    pub fn kind(&self) -> DispatchErrorKind {
        match self {
            SendClientError::Transport(_) => DispatchErrorKind::Retryable,
            SendClientError::Service {
                code, sender_fault, ..
            } => DispatchErrorKind::classify(code, *sender_fault),
        }
    }
}

/// The network client that performs the batch-send RPC.
///
/// Implementations must tolerate duplicate delivery (the broker is
/// at-least-once) and report one [`EntryResult`] per entry id they were given.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the scheduler task and explicit
/// flush callers share one client.
#[async_trait]
pub trait BatchSendClient: Send + Sync {
    /// Send `entries` to the physical queue `queue_name` in one call.
    async fn send_batch(
        &self,
        queue_name: &str,
        entries: &[Entry],
    ) -> Result<Vec<EntryResult>, SendClientError>;
}
