//! Key rotation and bulk re-encryption.
//!
//! Both operations take the adapter's rotation lock, so at most one pass
//! runs per process. The scan only supplies ids: each record is read again
//! right before it is re-sealed, so writes and deletes that land after the
//! scan are kept. A write racing the read-then-upsert of the same record can
//! still be overwritten; records written with the previous version stay
//! readable and are picked up by the next pass.

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::{AdapterError, RecordAdapter};
use crate::engine::{DecryptionError, EngineError};
use crate::keys::KeyVersion;
use crate::record::Record;
use crate::store::StoreError;

/// Why one record could not be re-sealed. The record is left as it was.
#[derive(Debug, Error)]
pub enum ReEncryptError {
    #[error("decrypt: {0}")]
    Decrypt(#[from] DecryptionError),
    #[error("encrypt: {0}")]
    Encrypt(#[from] EngineError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct ReEncryptFailure {
    pub id: String,
    pub error: ReEncryptError,
}

/// Outcome of a re-encryption pass.
#[derive(Debug)]
pub struct ReEncryptReport {
    /// Version every successfully re-sealed record now carries.
    pub key_version: KeyVersion,
    pub scanned: usize,
    pub re_encrypted: usize,
    /// Records with no sensitive field to re-seal.
    pub skipped: usize,
    /// Records deleted between the scan and their re-seal.
    pub vanished: usize,
    pub failures: Vec<ReEncryptFailure>,
}

impl RecordAdapter {
    /// Mint a new active key version, then re-seal every record under it.
    ///
    /// # Errors
    ///
    /// - [`AdapterError::RotationInProgress`] if a pass is already running.
    /// - [`AdapterError::Engine`] if the provider cannot mint a version.
    /// - [`AdapterError::Store`] if the full scan cannot be read.
    ///
    /// Per-record failures do not fail the call; they are listed in the report.
    pub async fn rotate_key(&self) -> Result<ReEncryptReport, AdapterError> {
        let _guard = self
            .rotation
            .try_lock()
            .map_err(|_| AdapterError::RotationInProgress)?;
        let version = self.engine.rotate().await?;
        info!(key_version = %version, "key rotated; re-encrypting records");
        self.re_encrypt_pass().await
    }

    /// Re-seal every record under the active version.
    ///
    /// Useful after an interrupted rotation. Waits for a running pass to
    /// finish rather than failing.
    pub async fn re_encrypt_all(&self) -> Result<ReEncryptReport, AdapterError> {
        let _guard = self.rotation.lock().await;
        self.re_encrypt_pass().await
    }

    async fn re_encrypt_pass(&self) -> Result<ReEncryptReport, AdapterError> {
        let key_version = self.engine.active_version();
        let ids: Vec<String> = self
            .retry
            .execute("query_all", || self.store.query_all(None))
            .await?
            .into_iter()
            .map(|record| record.id().to_owned())
            .collect();

        let mut report = ReEncryptReport {
            key_version,
            scanned: ids.len(),
            re_encrypted: 0,
            skipped: 0,
            vanished: 0,
            failures: Vec::new(),
        };

        for id in ids {
            let current = self.retry.execute("read", || self.store.read(&id)).await;
            let outcome = match current {
                Ok(Some(record)) => self.re_seal(record).await,
                Ok(None) => {
                    report.vanished += 1;
                    continue;
                }
                Err(err) => Err(err.into()),
            };
            match outcome {
                Ok(true) => report.re_encrypted += 1,
                Ok(false) => report.skipped += 1,
                Err(error) => {
                    warn!(id = %id, error = %error, "failed to re-encrypt record");
                    report.failures.push(ReEncryptFailure { id, error });
                }
            }
        }

        info!(
            key_version = %report.key_version,
            scanned = report.scanned,
            re_encrypted = report.re_encrypted,
            skipped = report.skipped,
            vanished = report.vanished,
            failed = report.failures.len(),
            "re-encryption pass complete"
        );
        Ok(report)
    }

    /// Open and re-seal one record, writing it back whole.
    ///
    /// Returns `false` when the record has no sensitive field.
    async fn re_seal(&self, mut record: Record) -> Result<bool, ReEncryptError> {
        let field = self.sensitive_field.as_str();
        let plaintext = match record.get(field) {
            None => return Ok(false),
            Some(Value::String(envelope)) => self.engine.decrypt_str(envelope).await?,
            Some(_) => return Err(DecryptionError::NotAString.into()),
        };
        let sealed = self.engine.encrypt(&plaintext).await?;
        record.insert(field, Value::String(sealed.to_string()));
        self.retry
            .execute("upsert", || self.store.upsert(record.clone()))
            .await?;
        Ok(true)
    }
}
