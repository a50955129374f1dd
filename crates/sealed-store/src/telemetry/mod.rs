//! Tracing setup: structured JSON logs, plus OTLP span export when a
//! collector endpoint is configured.
//!
//! # Telemetry invariants
//!
//! - **No plaintext sensitive values or key material** may appear in any
//!   span attribute or log field. Record ids and key version ids are fine.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::{init_telemetry, shutdown};
