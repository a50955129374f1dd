//! AES-256-GCM-SIV primitives backing the local key provider.
//!
//! No AWS or HTTP dependencies.
//!
//! # Ciphertext layout
//!
//! ```text
//! nonce (12 bytes) || ciphertext + tag
//! ```
//!
//! The key version is not part of these bytes; it travels in the
//! surrounding [`crate::engine::SealedValue`] envelope.

pub mod cipher;

pub use cipher::{generate_key, open, seal, KEY_LEN};
