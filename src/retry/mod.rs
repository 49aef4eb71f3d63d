//! Retry policy for entries that failed with a retryable dispatch error.

mod backoff;
mod tracker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use tracker::{FailedMessage, RetryDecision, RetryTracker};
