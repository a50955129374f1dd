//! Axum middleware layers applied to the router.
//!
//! Request tracing and response compression wrap every route. The timeout
//! only wraps routes whose work is bounded by a single record.

use std::time::Duration;

use axum::Router;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Default per-request timeout for CRUD and health routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound every route of `router` by `request_timeout`.
///
/// A request still running after `request_timeout` is answered with
/// `408 Request Timeout` and its handler future is dropped.
pub fn with_timeout<S>(router: Router<S>, request_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(TimeoutLayer::new(request_timeout))
}

/// Wrap `router` in the shared tracing and compression layers.
pub fn apply<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}
