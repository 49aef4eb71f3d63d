// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Buffering and batching
pub mod batch;
pub mod queue;
pub mod retry;

// Dispatch path
pub mod dispatch;
pub mod scheduler;

// Public surface
pub mod broker;
pub mod host;
pub mod shutdown;

pub use broker::{BatchBroker, BrokerMetricsSnapshot, FlushReport, QueueStatus};
pub use config::{BrokerConfig, Settings};
pub use dispatch::{BatchSendClient, DispatchErrorKind, EntryResult, SendClientError};
pub use error::{BrokerError, Result};
pub use queue::Entry;
pub use shutdown::ShutdownReport;
