//! Document-store capability: durable, id-addressed record storage.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: ordered in-process map, for development and tests.
//! - [`S3Store`]: one JSON object per record in an S3 bucket.
//!
//! Both list records in ascending id order, which keeps cursor and offset
//! pagination deterministic absent concurrent writes.

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::record::Record;
use crate::retry::Retryable;

/// Errors returned by a [`DocumentStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// `create` found an existing record with the same id.
    #[error("record {0} already exists")]
    Conflict(String),

    /// A failure that may succeed if retried (timeouts, throttling, 5xx).
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A failure that will not go away by retrying.
    #[error("store request failed: {0}")]
    Permanent(String),

    /// A stored document could not be parsed as a record.
    #[error("stored document is malformed: {0}")]
    Malformed(String),

    /// A continuation token was not issued by this store.
    #[error("invalid continuation token")]
    InvalidContinuation,
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Equality predicate evaluated against stored records.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn matches(&self, record: &Record) -> bool {
        if self.field == crate::record::ID_FIELD {
            return self.value.as_str() == Some(record.id());
        }
        record.get(&self.field) == Some(&self.value)
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StorePage {
    pub records: Vec<Record>,
    /// Resume token, absent once the listing is exhausted.
    pub continuation_token: Option<String>,
}

/// Durable key-addressed record storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every record, optionally restricted by an equality predicate.
    async fn query_all(&self, filter: Option<FieldFilter>) -> Result<Vec<Record>, StoreError>;

    /// Up to `max_item_count` records after `continuation_token`.
    async fn query_page(
        &self,
        max_item_count: usize,
        continuation_token: Option<String>,
    ) -> Result<StorePage, StoreError>;

    /// Up to `limit` records after skipping the first `offset`.
    async fn query_offset(&self, offset: usize, limit: usize) -> Result<Vec<Record>, StoreError>;

    /// Insert a new record; fails with [`StoreError::Conflict`] if the id exists.
    async fn create(&self, record: Record) -> Result<Record, StoreError>;

    /// Fetch a record by id; `Ok(None)` when absent.
    async fn read(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Insert or replace a record by id.
    async fn upsert(&self, record: Record) -> Result<Record, StoreError>;

    /// Remove a record by id. Removing an absent id succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        Record::from_map(v.as_object().cloned().unwrap()).unwrap()
    }

    #[test]
    fn filter_matches_payload_field() {
        let f = FieldFilter {
            field: "type".into(),
            value: json!("role"),
        };
        assert!(f.matches(&record(json!({"id": "r1", "type": "role"}))));
        assert!(!f.matches(&record(json!({"id": "u1", "type": "user"}))));
        assert!(!f.matches(&record(json!({"id": "x"}))));
    }

    #[test]
    fn filter_matches_id() {
        let f = FieldFilter {
            field: "id".into(),
            value: json!("u1"),
        };
        assert!(f.matches(&record(json!({"id": "u1"}))));
        assert!(!f.matches(&record(json!({"id": "u2"}))));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(StoreError::Transient("503".into()).is_transient());
        assert!(!StoreError::Conflict("u1".into()).is_transient());
        assert!(!StoreError::Permanent("403".into()).is_transient());
        assert!(!StoreError::Malformed("x".into()).is_transient());
        assert!(!StoreError::InvalidContinuation.is_transient());
    }
}
