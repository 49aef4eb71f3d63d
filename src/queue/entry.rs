//! The unit of bufferable work.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A message waiting to be dispatched.
///
/// Entries are immutable once created. The payload size is computed once at
/// construction and cached, since the planner consults it on every flush.
#[derive(Debug, PartialEq, Eq)]
pub struct Entry {
    id: Uuid,
    payload: Bytes,
    size_bytes: usize,
    enqueued_at: DateTime<Utc>,
}

impl Entry {
    /// Create a new entry with a fresh id.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// Create an entry with a caller-chosen id.
    pub fn with_id(id: Uuid, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            id,
            size_bytes: payload.len(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_payload_length() {
        let entry = Entry::new(vec![0u8; 1024]);
        assert_eq!(entry.size_bytes(), 1024);
        assert_eq!(entry.payload().len(), 1024);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Entry::new("a");
        let b = Entry::new("a");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_with_id_keeps_id() {
        let id = Uuid::new_v4();
        let entry = Entry::with_id(id, "payload");
        assert_eq!(entry.id(), id);
        assert_eq!(entry.size_bytes(), 7);
    }
}
