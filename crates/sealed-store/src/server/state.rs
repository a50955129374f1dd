//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::adapter::RecordAdapter;

/// Application state shared across all request handlers.
///
/// Cloned per request; every field is `Arc`-backed or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Encrypted CRUD over the configured document store.
    pub adapter: Arc<RecordAdapter>,
    /// Page size used when a listing request gives no `limit`.
    pub default_page_size: usize,
}

impl AppState {
    pub fn new(adapter: Arc<RecordAdapter>, default_page_size: usize) -> Self {
        Self {
            adapter,
            default_page_size,
        }
    }
}
