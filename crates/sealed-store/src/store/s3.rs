//! [`S3Store`]: records as JSON objects in an S3 bucket.
//!
//! Layout: `<prefix><id>.json`. Listing order is S3's lexicographic key
//! order, so records come back sorted by id.
//!
//! S3 offers no server-side offset; [`DocumentStore::query_offset`] lists
//! keys and skips client-side.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use super::{DocumentStore, FieldFilter, StoreError, StorePage};
use crate::record::Record;

const SUFFIX: &str = ".json";

/// S3 caps `ListObjectsV2` pages at 1000 keys.
const LIST_PAGE_MAX: usize = 1000;

/// Document store backed by one S3 bucket and key prefix.
#[derive(Clone, Debug)]
pub struct S3Store {
    s3: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

/// One page of object keys plus the token to fetch the next.
struct KeyPage {
    ids: Vec<String>,
    next: Option<String>,
}

impl S3Store {
    pub fn new(
        s3: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            s3,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn object_key(&self, id: &str) -> String {
        object_key(&self.prefix, id)
    }

    async fn list_ids(
        &self,
        max_keys: usize,
        token: Option<String>,
    ) -> Result<KeyPage, StoreError> {
        let resp = self
            .s3
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .max_keys(i32::try_from(max_keys.min(LIST_PAGE_MAX)).unwrap_or(i32::MAX))
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| classify("list objects", e))?;

        let ids = resp
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .filter_map(|key| id_from_key(&self.prefix, key))
            .collect();
        let next = match resp.is_truncated() {
            Some(true) => resp.next_continuation_token().map(str::to_owned),
            _ => None,
        };
        Ok(KeyPage { ids, next })
    }

    /// Every record id under the prefix, in key order.
    async fn all_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_ids(LIST_PAGE_MAX, token).await?;
            ids.extend(page.ids);
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(ids),
            }
        }
    }

    /// Fetch records for `ids`, skipping any deleted since they were listed.
    async fn fetch_all(&self, ids: Vec<String>) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(&id).await? {
                Some(record) => records.push(record),
                None => debug!(id = %id, "record vanished between list and get"),
            }
        }
        Ok(records)
    }

    async fn put(&self, record: &Record, if_absent: bool) -> Result<(), StoreError> {
        let body = serde_json::to_vec(record).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let mut req = self
            .s3
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(record.id()))
            .content_type("application/json")
            .body(ByteStream::from(body));
        if if_absent {
            req = req.if_none_match("*");
        }
        match req.send().await {
            Ok(_) => Ok(()),
            Err(err) if if_absent && status_of(&err) == Some(412) => {
                Err(StoreError::Conflict(record.id().to_owned()))
            }
            Err(err) => Err(classify("put object", err)),
        }
    }
}

#[async_trait]
impl DocumentStore for S3Store {
    async fn query_all(&self, filter: Option<FieldFilter>) -> Result<Vec<Record>, StoreError> {
        let records = self.fetch_all(self.all_ids().await?).await?;
        Ok(match filter {
            Some(f) => records.into_iter().filter(|r| f.matches(r)).collect(),
            None => records,
        })
    }

    async fn query_page(
        &self,
        max_item_count: usize,
        continuation_token: Option<String>,
    ) -> Result<StorePage, StoreError> {
        if max_item_count == 0 {
            return Err(StoreError::Permanent("max_item_count must be > 0".into()));
        }
        let page = self.list_ids(max_item_count, continuation_token).await?;
        Ok(StorePage {
            records: self.fetch_all(page.ids).await?,
            continuation_token: page.next,
        })
    }

    async fn query_offset(&self, offset: usize, limit: usize) -> Result<Vec<Record>, StoreError> {
        let mut skipped = 0;
        let mut wanted = Vec::with_capacity(limit);
        let mut token = None;
        while wanted.len() < limit {
            let page = self.list_ids(LIST_PAGE_MAX, token).await?;
            for id in page.ids {
                if skipped < offset {
                    skipped += 1;
                } else if wanted.len() < limit {
                    wanted.push(id);
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        self.fetch_all(wanted).await
    }

    async fn create(&self, record: Record) -> Result<Record, StoreError> {
        self.put(&record, true).await?;
        Ok(record)
    }

    async fn read(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let resp = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(id))
            .send()
            .await;
        let obj = match resp {
            Ok(obj) => obj,
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_no_such_key() => return Ok(None),
            Err(err) => return Err(classify("get object", err)),
        };
        let bytes = obj
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("read body for {id}: {e}")))?
            .into_bytes();
        let record: Record = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Malformed(format!("{id}: {e}")))?;
        Ok(Some(record))
    }

    async fn upsert(&self, record: Record) -> Result<Record, StoreError> {
        self.put(&record, false).await?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.s3
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(id))
            .send()
            .await
            .map_err(|e| classify("delete object", e))?;
        Ok(())
    }
}

fn object_key(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}{SUFFIX}")
}

fn id_from_key(prefix: &str, key: &str) -> Option<String> {
    key.strip_prefix(prefix)?
        .strip_suffix(SUFFIX)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|resp| resp.status().as_u16())
}

/// Throttling, request timeouts, and server errors are worth retrying.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429) || (500..600).contains(&status)
}

/// Map an SDK error to a [`StoreError`], separating transient from permanent failures.
fn classify<E>(context: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_)
        | SdkError::DispatchFailure(_)
        | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(_) => status_of(&err).is_some_and(is_transient_status),
        _ => false,
    };
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    if transient {
        StoreError::Transient(message)
    } else {
        StoreError::Permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_round_trip_ids() {
        let key = object_key("items/", "u1");
        assert_eq!(key, "items/u1.json");
        assert_eq!(id_from_key("items/", &key).as_deref(), Some("u1"));
    }

    #[test]
    fn foreign_keys_are_ignored() {
        assert_eq!(id_from_key("items/", "other/u1.json"), None);
        assert_eq!(id_from_key("items/", "items/u1.txt"), None);
        assert_eq!(id_from_key("items/", "items/.json"), None);
    }

    #[test]
    fn status_classification() {
        for s in [408, 409, 429, 500, 503] {
            assert!(is_transient_status(s), "{s} should be transient");
        }
        for s in [400, 403, 404, 412] {
            assert!(!is_transient_status(s), "{s} should be permanent");
        }
    }
}
