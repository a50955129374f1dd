//! Axum HTTP server, routing, and middleware.
//!
//! # Responsibilities
//! - Define the Axum router with all routes and shared middleware.
//! - Translate HTTP requests into [`crate::adapter::RecordAdapter`] calls.
//! - Map adapter errors onto status codes and JSON error bodies.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
