//! Dispatching planned batches through the external send client.

mod client;
mod executor;
mod logging_client;

pub use client::{
    BatchSendClient, DispatchErrorKind, EntryFailure, EntryResult, SendClientError,
};
pub use executor::{DispatchExecutor, DispatchFailure, SendResult};
pub use logging_client::LoggingSendClient;
