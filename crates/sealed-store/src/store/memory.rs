//! [`MemoryStore`]: in-process document store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentStore, FieldFilter, StoreError, StorePage};
use crate::record::Record;

/// Ordered in-memory store keyed by record id.
///
/// Continuation tokens are the id of the last record returned.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query_all(&self, filter: Option<FieldFilter>) -> Result<Vec<Record>, StoreError> {
        let map = self.inner.read().await;
        Ok(map
            .values()
            .filter(|r| filter.as_ref().map_or(true, |f| f.matches(r)))
            .cloned()
            .collect())
    }

    async fn query_page(
        &self,
        max_item_count: usize,
        continuation_token: Option<String>,
    ) -> Result<StorePage, StoreError> {
        if max_item_count == 0 {
            return Err(StoreError::Permanent("max_item_count must be > 0".into()));
        }
        if continuation_token.as_deref() == Some("") {
            return Err(StoreError::InvalidContinuation);
        }
        let map = self.inner.read().await;
        let lower = match &continuation_token {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };
        let mut iter = map.range((lower, Bound::Unbounded));
        let records: Vec<Record> = iter
            .by_ref()
            .take(max_item_count)
            .map(|(_, r)| r.clone())
            .collect();
        let continuation_token = match (records.last(), iter.next()) {
            (Some(last), Some(_)) => Some(last.id().to_owned()),
            _ => None,
        };
        Ok(StorePage {
            records,
            continuation_token,
        })
    }

    async fn query_offset(&self, offset: usize, limit: usize) -> Result<Vec<Record>, StoreError> {
        let map = self.inner.read().await;
        Ok(map.values().skip(offset).take(limit).cloned().collect())
    }

    async fn create(&self, record: Record) -> Result<Record, StoreError> {
        let mut map = self.inner.write().await;
        if map.contains_key(record.id()) {
            return Err(StoreError::Conflict(record.id().to_owned()));
        }
        map.insert(record.id().to_owned(), record.clone());
        Ok(record)
    }

    async fn read(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: Record) -> Result<Record, StoreError> {
        self.inner
            .write()
            .await
            .insert(record.id().to_owned(), record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}
