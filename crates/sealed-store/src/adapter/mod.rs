//! Transparent encrypted CRUD over a [`DocumentStore`].
//!
//! [`RecordAdapter`] is the only component request handlers talk to. Writes
//! seal the sensitive field before they reach the store; reads open it
//! before they leave. Every store call goes through the [`RetryPolicy`].
//!
//! The adapter holds no persistent state of its own. The one piece of
//! in-process coordination is the rotation lock, which keeps key rotation
//! and bulk re-encryption single-flight.

pub mod page;
pub mod rotation;

pub use page::{NextCursor, PageRequest};
pub use rotation::ReEncryptReport;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::protocol::FIELD_ERRORS_KEY;
use common::ServiceError;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::{DecryptionError, EncryptionEngine, EngineError};
use crate::record::{Record, RecordError};
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, FieldFilter, StoreError};

/// Errors surfaced by [`RecordAdapter`] operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The caller supplied a record this service cannot store.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The caller supplied unusable paging parameters.
    #[error("invalid page request: {0}")]
    InvalidPage(String),

    /// The document store failed (after retries, where applicable).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sealing or key rotation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Another rotation or re-encryption pass holds the rotation lock.
    #[error("a key rotation is already in progress")]
    RotationInProgress,
}

impl From<RecordError> for AdapterError {
    fn from(err: RecordError) -> Self {
        AdapterError::InvalidRecord(err.to_string())
    }
}

impl From<AdapterError> for ServiceError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::InvalidRecord(_) | AdapterError::InvalidPage(_) => {
                ServiceError::BadRequest(err.to_string())
            }
            AdapterError::Store(StoreError::Conflict(_)) | AdapterError::RotationInProgress => {
                ServiceError::Conflict(err.to_string())
            }
            AdapterError::Store(StoreError::InvalidContinuation) => {
                ServiceError::BadRequest(err.to_string())
            }
            AdapterError::Store(StoreError::Malformed(_)) => {
                ServiceError::Internal(err.to_string())
            }
            AdapterError::Store(_) => ServiceError::Unavailable(err.to_string()),
            AdapterError::Engine(_) => ServiceError::EncryptionFailure(err.to_string()),
        }
    }
}

/// A record read back from the store with its sensitive field opened.
///
/// If opening failed the field is absent from `record` and the failure is
/// listed in `field_errors`; the rest of the record is intact.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedRecord {
    pub record: Record,
    pub field_errors: BTreeMap<String, DecryptionError>,
}

/// Encrypted CRUD, listing, and key rotation over a document store.
pub struct RecordAdapter {
    store: Arc<dyn DocumentStore>,
    engine: Arc<EncryptionEngine>,
    retry: RetryPolicy,
    sensitive_field: String,
    max_page_size: usize,
    rotation: Mutex<()>,
}

impl RecordAdapter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<EncryptionEngine>,
        retry: RetryPolicy,
        sensitive_field: impl Into<String>,
        max_page_size: usize,
    ) -> Self {
        Self {
            store,
            engine,
            retry,
            sensitive_field: sensitive_field.into(),
            max_page_size,
            rotation: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &EncryptionEngine {
        &self.engine
    }

    /// Store a new record, assigning an id if it has none.
    ///
    /// Returns the record as stored but with the sensitive field in plaintext.
    ///
    /// When a retried create hits [`StoreError::Conflict`], the stored record
    /// is read back. If it is exactly the envelope this call sent, an earlier
    /// attempt landed and the create succeeds.
    pub async fn create(&self, fields: Map<String, Value>) -> Result<Record, AdapterError> {
        let record = Record::from_map_or_assign_id(fields)?;
        let sealed = self.seal(record.clone()).await?;
        let mut attempts = 0u32;
        let created = self
            .retry
            .execute("create", || {
                attempts += 1;
                self.store.create(sealed.clone())
            })
            .await;
        if let Err(err) = created {
            let retried_conflict = matches!(err, StoreError::Conflict(_)) && attempts > 1;
            if !retried_conflict || !self.is_stored(&sealed).await? {
                return Err(err.into());
            }
            info!(id = %record.id(), attempts, "create landed on an earlier attempt");
        }
        info!(id = %record.id(), "record created");
        Ok(record)
    }

    /// Fetch and open a record; `Ok(None)` when the id does not exist.
    pub async fn read(&self, id: &str) -> Result<Option<OpenedRecord>, AdapterError> {
        let found = self.retry.execute("read", || self.store.read(id)).await?;
        match found {
            Some(record) => Ok(Some(self.open(record).await)),
            None => Ok(None),
        }
    }

    /// Replace a record by id (upsert). Repeating the same update is a no-op.
    pub async fn update(&self, fields: Map<String, Value>) -> Result<Record, AdapterError> {
        let record = Record::from_map(fields)?;
        let sealed = self.seal(record.clone()).await?;
        self.retry
            .execute("update", || self.store.upsert(sealed.clone()))
            .await?;
        info!(id = %record.id(), "record updated");
        Ok(record)
    }

    /// Delete a record by id. Deleting an absent id succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), AdapterError> {
        self.retry.execute("delete", || self.store.delete(id)).await?;
        info!(id = %id, "record deleted");
        Ok(())
    }

    /// Every record whose `field` equals `value`, opened.
    ///
    /// The sensitive field cannot be searched: sealed values are randomized.
    pub async fn find_by(
        &self,
        field: &str,
        value: Value,
    ) -> Result<Vec<OpenedRecord>, AdapterError> {
        if field == self.sensitive_field {
            return Err(AdapterError::InvalidRecord(format!(
                "field {field} is encrypted and cannot be searched"
            )));
        }
        let filter = FieldFilter {
            field: field.to_owned(),
            value,
        };
        let records = self
            .retry
            .execute("query", || self.store.query_all(Some(filter.clone())))
            .await?;
        Ok(self.open_all(records).await)
    }

    async fn is_stored(&self, sealed: &Record) -> Result<bool, AdapterError> {
        let current = self
            .retry
            .execute("read", || self.store.read(sealed.id()))
            .await?;
        Ok(current.as_ref() == Some(sealed))
    }

    /// Replace the plaintext sensitive field with its sealed envelope.
    ///
    /// Records may not carry the response-reserved `field_errors` key.
    async fn seal(&self, mut record: Record) -> Result<Record, AdapterError> {
        if record.get(FIELD_ERRORS_KEY).is_some() {
            return Err(AdapterError::InvalidRecord(format!(
                "field {FIELD_ERRORS_KEY} is reserved"
            )));
        }
        match record.get(&self.sensitive_field) {
            None => Ok(record),
            Some(Value::String(plaintext)) => {
                let sealed = self.engine.encrypt(plaintext).await?;
                record.insert(&self.sensitive_field, Value::String(sealed.to_string()));
                Ok(record)
            }
            Some(_) => Err(AdapterError::InvalidRecord(format!(
                "field {} must be a string",
                self.sensitive_field
            ))),
        }
    }

    /// Open the sealed field in place, recording a typed error on failure.
    async fn open(&self, mut record: Record) -> OpenedRecord {
        let mut field_errors = BTreeMap::new();
        let field = self.sensitive_field.as_str();
        let opened = match record.get(field) {
            None => None,
            Some(Value::String(envelope)) => Some(self.engine.decrypt_str(envelope).await),
            Some(_) => Some(Err(DecryptionError::NotAString)),
        };
        match opened {
            Some(Ok(plaintext)) => record.insert(field, Value::String(plaintext)),
            Some(Err(err)) => {
                warn!(id = %record.id(), field, error = %err, "failed to decrypt field");
                record.remove(field);
                field_errors.insert(field.to_owned(), err);
            }
            None => {}
        }
        OpenedRecord {
            record,
            field_errors,
        }
    }

    async fn open_all(&self, records: Vec<Record>) -> Vec<OpenedRecord> {
        let mut opened = Vec::with_capacity(records.len());
        for record in records {
            opened.push(self.open(record).await);
        }
        opened
    }
}
