use thiserror::Error;

/// Errors surfaced synchronously to callers of the broker.
///
/// Dispatch-side failures (oversized entries, retryable and non-retryable send
/// failures, retry exhaustion) are resolved inside the flush path and only show
/// up in logs and metrics; they never reach the producer.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Queue {queue} is at capacity ({capacity} entries), enqueue rejected")]
    BackpressureRejected { queue: String, capacity: usize },

    #[error("Broker is shutting down, enqueue to {queue} rejected")]
    ShutdownRejected { queue: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Broker must be created from within a tokio runtime")]
    NoRuntime,
}

impl BrokerError {
    /// Whether the producer may redeliver the same work later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::BackpressureRejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
