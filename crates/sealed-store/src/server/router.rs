//! Axum router construction.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
///
/// `/rotate-key` and `/re-encrypt` walk the whole collection and are not
/// bound by the request timeout.
pub fn build(state: AppState, request_timeout: Duration) -> Router {
    let bounded = Router::new()
        .route("/items", post(handlers::create).get(handlers::list))
        .route(
            "/items/:id",
            get(handlers::read)
                .put(handlers::update)
                .delete(handlers::delete),
        )
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found);
    let maintenance = Router::new()
        .route("/rotate-key", post(handlers::rotate_key))
        .route("/re-encrypt", post(handlers::re_encrypt));
    middleware::apply(middleware::with_timeout(bounded, request_timeout).merge(maintenance))
        .with_state(state)
}
