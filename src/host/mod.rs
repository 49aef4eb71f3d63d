//! Adapter for host dispatch frameworks.
//!
//! A host (task queue, job runner, web handler) only needs to hand each
//! outgoing unit of work to a [`MessageSink`] and react to backpressure.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::broker::BatchBroker;
use crate::error::Result;

/// Narrow enqueue-only interface a host framework calls into.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Buffer `payload` for `queue_name`.
    ///
    /// Returns quickly with the entry id or an explicit rejection
    /// (backpressure or shutdown) the host must handle.
    async fn submit(&self, queue_name: &str, payload: Bytes) -> Result<Uuid>;
}

#[async_trait]
impl MessageSink for BatchBroker {
    async fn submit(&self, queue_name: &str, payload: Bytes) -> Result<Uuid> {
        self.enqueue(queue_name, payload).await
    }
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    async fn submit(&self, queue_name: &str, payload: Bytes) -> Result<Uuid> {
        (**self).submit(queue_name, payload).await
    }
}

/// A serializable message body destined for a queue.
#[derive(Debug, Clone)]
pub struct JsonMessage<T> {
    pub queue_name: String,
    pub body: T,
}

impl<T: Serialize> JsonMessage<T> {
    pub fn new(queue_name: impl Into<String>, body: T) -> Self {
        Self {
            queue_name: queue_name.into(),
            body,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(&self.body).map(Bytes::from)
    }

    /// Encode the body as JSON and submit it.
    ///
    /// Encoding failures are returned as the outer error; sink rejections as
    /// the inner one.
    pub async fn send_to<S: MessageSink + ?Sized>(
        &self,
        sink: &S,
    ) -> serde_json::Result<Result<Uuid>> {
        let payload = self.to_bytes()?;
        Ok(sink.submit(&self.queue_name, payload).await)
    }
}
