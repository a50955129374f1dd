//! Key-management capability: named, versioned key material behind a narrow interface.
//!
//! A [`KeyProvider`] owns key material; this service only ever holds
//! [`CryptoHandle`]s that encrypt and decrypt under one specific version.
//!
//! # Invariants
//!
//! - Versions are never deleted by this service. Rotation only adds a version.
//! - The active version is the one with the latest creation timestamp.
//! - A version identifier never contains `|`, the sealed-envelope separator.

pub mod kms;
pub mod local;

pub use kms::KmsKeyProvider;
pub use local::LocalKeyProvider;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier naming one generation of key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersion(String);

impl KeyVersion {
    /// Wrap a provider-issued version identifier.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProviderError::InvalidVersion`] if `id` is empty or
    /// contains the envelope separator `|`.
    pub fn new(id: impl Into<String>) -> Result<Self, KeyProviderError> {
        let id = id.into();
        if id.is_empty() || id.contains('|') {
            return Err(KeyProviderError::InvalidVersion(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version together with the moment the provider created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersionInfo {
    pub version: KeyVersion,
    pub created_at: SystemTime,
}

/// Errors produced by key providers and crypto handles.
#[derive(Debug, Error)]
pub enum KeyProviderError {
    /// The named key has no versions at all.
    #[error("key {0} has no versions")]
    NoVersions(String),

    /// The requested version does not exist for the named key.
    #[error("unknown key version {version} for key {key_name}")]
    UnknownVersion { key_name: String, version: String },

    /// A provider returned an identifier that cannot be used as a version.
    #[error("invalid key version identifier: {0:?}")]
    InvalidVersion(String),

    /// The underlying encrypt/decrypt primitive failed.
    #[error("crypto operation failed: {0}")]
    Crypto(String),

    /// The provider could not be reached or rejected the request.
    #[error("key provider request failed: {0}")]
    Provider(String),
}

/// Encrypt/decrypt primitives bound to one key version.
#[async_trait]
pub trait CryptoHandle: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError>;
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyProviderError>;
}

/// Holds named, versioned key material.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Enumerate every version of `key_name`, in no particular order.
    async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersionInfo>, KeyProviderError>;

    /// Resolve the version new encryptions should use.
    ///
    /// The default picks the latest entry of [`KeyProvider::list_versions`].
    async fn get_active_version(&self, key_name: &str) -> Result<KeyVersion, KeyProviderError> {
        let versions = self.list_versions(key_name).await?;
        select_latest(versions).ok_or_else(|| KeyProviderError::NoVersions(key_name.to_owned()))
    }

    /// Obtain a crypto handle for one specific version.
    async fn get_crypto_handle(
        &self,
        key_name: &str,
        version: &KeyVersion,
    ) -> Result<Arc<dyn CryptoHandle>, KeyProviderError>;

    /// Mint a new version of `key_name`.
    ///
    /// The returned handle is usable immediately, even where the provider's
    /// version listing lags behind the write.
    async fn create_new_version(&self, key_name: &str) -> Result<MintedVersion, KeyProviderError>;
}

/// A freshly created version and its crypto handle.
pub struct MintedVersion {
    pub version: KeyVersion,
    pub handle: Arc<dyn CryptoHandle>,
}

impl fmt::Debug for MintedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintedVersion")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Pick the version with the latest creation timestamp.
///
/// Equal timestamps fall back to identifier ordering so the choice stays
/// deterministic.
pub fn select_latest(versions: Vec<KeyVersionInfo>) -> Option<KeyVersion> {
    versions
        .into_iter()
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version.cmp(&b.version))
        })
        .map(|info| info.version)
}
