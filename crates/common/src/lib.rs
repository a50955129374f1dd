//! Common types, protocol definitions, and errors shared across `sealed-store` crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
