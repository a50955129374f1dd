//! In-process key provider for development and tests.
//!
//! Key material lives only in memory and is lost when the process exits, so
//! anything sealed by this provider becomes unreadable after a restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CryptoHandle, KeyProvider, KeyProviderError, KeyVersion, KeyVersionInfo, MintedVersion,
};
use crate::crypto::{self, KEY_LEN};

/// One generation of local key material.
struct LocalKey {
    version: KeyVersion,
    created_at: SystemTime,
    material: Arc<[u8; KEY_LEN]>,
}

/// Key provider that keeps AES-256-GCM-SIV keys in process memory.
///
/// Versions are named `v1`, `v2`, … per key name and carry strictly
/// increasing creation timestamps.
#[derive(Clone, Default)]
pub struct LocalKeyProvider {
    keys: Arc<RwLock<HashMap<String, Vec<LocalKey>>>>,
}

impl fmt::Debug for LocalKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalKeyProvider([REDACTED])")
    }
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that already holds a first version of `key_name`.
    pub async fn with_initial_version(key_name: &str) -> Result<Self, KeyProviderError> {
        let provider = Self::new();
        provider.create_new_version(key_name).await?;
        Ok(provider)
    }
}

struct LocalHandle {
    material: Arc<[u8; KEY_LEN]>,
}

#[async_trait]
impl CryptoHandle for LocalHandle {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        crypto::seal(plaintext, &self.material[..])
            .map_err(|e| KeyProviderError::Crypto(e.to_string()))
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        crypto::open(ciphertext, &self.material[..])
            .map_err(|e| KeyProviderError::Crypto(e.to_string()))
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersionInfo>, KeyProviderError> {
        let keys = self.keys.read().await;
        Ok(keys
            .get(key_name)
            .map(|versions| {
                versions
                    .iter()
                    .map(|k| KeyVersionInfo {
                        version: k.version.clone(),
                        created_at: k.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_crypto_handle(
        &self,
        key_name: &str,
        version: &KeyVersion,
    ) -> Result<Arc<dyn CryptoHandle>, KeyProviderError> {
        let keys = self.keys.read().await;
        let key = keys
            .get(key_name)
            .and_then(|versions| versions.iter().find(|k| &k.version == version))
            .ok_or_else(|| KeyProviderError::UnknownVersion {
                key_name: key_name.to_owned(),
                version: version.to_string(),
            })?;
        Ok(Arc::new(LocalHandle {
            material: Arc::clone(&key.material),
        }))
    }

    async fn create_new_version(&self, key_name: &str) -> Result<MintedVersion, KeyProviderError> {
        let mut keys = self.keys.write().await;
        let versions = keys.entry(key_name.to_owned()).or_default();

        let version = KeyVersion::new(format!("v{}", versions.len() + 1))?;
        let now = SystemTime::now();
        // Keep creation times strictly increasing even if the clock stalls.
        let created_at = match versions.last() {
            Some(prev) if now <= prev.created_at => prev.created_at + Duration::from_nanos(1),
            _ => now,
        };

        let material = Arc::new(crypto::generate_key());
        versions.push(LocalKey {
            version: version.clone(),
            created_at,
            material: Arc::clone(&material),
        });
        Ok(MintedVersion {
            version,
            handle: Arc::new(LocalHandle { material }),
        })
    }
}
