//! Paginated listing.
//!
//! A listing runs in exactly one mode, fixed by the first request:
//!
//! - cursor mode (the default) resumes from an opaque store-native token;
//! - offset mode skips a count of already-seen records.
//!
//! Offset pages are computed by skipping, so records inserted or deleted
//! between calls shift later pages: a record may be seen twice or never.
//! `next` is offered whenever a page comes back full, so a collection whose
//! size is an exact multiple of `limit` ends with one empty page.

use super::{AdapterError, OpenedRecord, RecordAdapter};

/// Where a listing call starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageRequest {
    /// First page, cursor mode.
    #[default]
    Start,
    /// Resume a cursor-mode listing.
    Cursor(String),
    /// Skip this many records (offset mode).
    Offset(usize),
}

impl PageRequest {
    /// Resolve optional query parameters into a single mode.
    ///
    /// # Errors
    ///
    /// [`AdapterError::InvalidPage`] when both an offset and a token are given.
    pub fn from_params(
        offset: Option<usize>,
        continuation_token: Option<String>,
    ) -> Result<Self, AdapterError> {
        match (offset, continuation_token) {
            (Some(_), Some(_)) => Err(AdapterError::InvalidPage(
                "offset and continuation_token cannot be combined".into(),
            )),
            (None, Some(token)) => Ok(PageRequest::Cursor(token)),
            (Some(offset), None) => Ok(PageRequest::Offset(offset)),
            (None, None) => Ok(PageRequest::Start),
        }
    }
}

/// How to fetch the page after this one, in the same mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextCursor {
    Offset(usize),
    Token(String),
}

impl NextCursor {
    pub fn into_request(self) -> PageRequest {
        match self {
            NextCursor::Offset(offset) => PageRequest::Offset(offset),
            NextCursor::Token(token) => PageRequest::Cursor(token),
        }
    }
}

/// One page of opened records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<OpenedRecord>,
    /// Absent once the listing is exhausted.
    pub next: Option<NextCursor>,
}

impl RecordAdapter {
    /// List up to `limit` records starting at `request`.
    ///
    /// # Errors
    ///
    /// [`AdapterError::InvalidPage`] when `limit` is outside
    /// `1..=max_page_size`; store failures after retries.
    pub async fn list(&self, limit: usize, request: PageRequest) -> Result<Page, AdapterError> {
        if limit == 0 || limit > self.max_page_size {
            return Err(AdapterError::InvalidPage(format!(
                "limit must be between 1 and {}",
                self.max_page_size
            )));
        }

        let token = match request {
            PageRequest::Offset(offset) => return self.list_offset(offset, limit).await,
            PageRequest::Cursor(token) => Some(token),
            PageRequest::Start => None,
        };
        let page = self
            .retry
            .execute("query_page", || self.store.query_page(limit, token.clone()))
            .await?;
        Ok(Page {
            records: self.open_all(page.records).await,
            next: page.continuation_token.map(NextCursor::Token),
        })
    }

    async fn list_offset(&self, offset: usize, limit: usize) -> Result<Page, AdapterError> {
        let records = self
            .retry
            .execute("query_offset", || self.store.query_offset(offset, limit))
            .await?;
        let next = (records.len() == limit).then(|| NextCursor::Offset(offset + records.len()));
        Ok(Page {
            records: self.open_all(records).await,
            next,
        })
    }
}
