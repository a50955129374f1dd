//! Versioned field encryption.
//!
//! [`EncryptionEngine`] maps plaintext strings to [`SealedValue`] envelopes
//! under the currently active key version, opens envelopes sealed under any
//! version the provider has ever issued, and advances the active version on
//! rotation.
//!
//! # Concurrency
//!
//! - The active version sits in an [`ArcSwap`]: `encrypt` takes a lock-free
//!   snapshot and never blocks on a rotation in progress.
//! - `rotate` and `refresh` are serialized by a single-writer mutex.
//! - Crypto handles are cached per version behind a read-mostly lock.
//!
//! Rotation never touches existing ciphertext. Re-sealing stored records is
//! a separate pass driven by [`crate::adapter::RecordAdapter`].

pub mod sealed;

pub use sealed::SealedValue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time;
use tracing::{debug, info, warn};

use crate::keys::{CryptoHandle, KeyProvider, KeyProviderError, KeyVersion};

/// Why an envelope could not be turned back into plaintext.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecryptionError {
    /// The value has no `|` separator, so it is not an envelope.
    #[error("sealed value is missing the '|' separator")]
    MissingSeparator,

    /// The ciphertext part is not valid base64, even after re-padding.
    #[error("sealed value has invalid base64: {0}")]
    InvalidBase64(String),

    /// The version part is empty or otherwise unusable.
    #[error("sealed value has an invalid key version: {0:?}")]
    InvalidVersion(String),

    /// The key provider does not know the version named by the envelope.
    #[error("unknown key version: {0}")]
    UnknownVersion(String),

    /// The decrypt primitive rejected the ciphertext.
    #[error("decryption failed: {0}")]
    Crypto(String),

    /// The key provider could not be reached.
    #[error("key provider unavailable: {0}")]
    Provider(String),

    /// The decrypted bytes are not UTF-8.
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,

    /// The stored field is not a string and so cannot be an envelope.
    #[error("sealed field is not a string")]
    NotAString,
}

impl From<KeyProviderError> for DecryptionError {
    fn from(err: KeyProviderError) -> Self {
        match err {
            KeyProviderError::UnknownVersion { version, .. } => Self::UnknownVersion(version),
            KeyProviderError::InvalidVersion(v) => Self::InvalidVersion(v),
            KeyProviderError::Crypto(msg) => Self::Crypto(msg),
            other => Self::Provider(other.to_string()),
        }
    }
}

/// Failures while sealing or rotating.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The key provider failed to supply a handle, encrypt, or mint a version.
    #[error(transparent)]
    Key(#[from] KeyProviderError),
}

/// Seals and opens field values using versioned keys from a [`KeyProvider`].
pub struct EncryptionEngine {
    provider: Arc<dyn KeyProvider>,
    key_name: String,
    active: ArcSwap<KeyVersion>,
    handles: RwLock<HashMap<KeyVersion, Arc<dyn CryptoHandle>>>,
    rotation: Mutex<()>,
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("key_name", &self.key_name)
            .field("active", &self.active.load().as_str())
            .finish_non_exhaustive()
    }
}

impl EncryptionEngine {
    /// Resolve the active version of `key_name` and build an engine around it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Key`] if the provider is unreachable or the key
    /// has no versions.
    pub async fn init(
        provider: Arc<dyn KeyProvider>,
        key_name: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let key_name = key_name.into();
        let active = provider.get_active_version(&key_name).await?;
        info!(key_name = %key_name, key_version = %active, "encryption engine initialised");
        Ok(Self {
            provider,
            key_name,
            active: ArcSwap::from_pointee(active),
            handles: RwLock::new(HashMap::new()),
            rotation: Mutex::new(()),
        })
    }

    /// The version new encryptions are sealed under.
    pub fn active_version(&self) -> KeyVersion {
        self.active.load().as_ref().clone()
    }

    /// Seal `plaintext` under the active version.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Key`] if a handle cannot be obtained or the
    /// encrypt primitive fails.
    pub async fn encrypt(&self, plaintext: &str) -> Result<SealedValue, EngineError> {
        let version = self.active.load_full();
        let handle = self.handle(&version).await?;
        let ciphertext = handle.encrypt(plaintext.as_bytes()).await?;
        Ok(SealedValue {
            ciphertext,
            key_version: version.as_ref().clone(),
        })
    }

    /// Open `sealed` with the version it names, which need not be the active one.
    ///
    /// # Errors
    ///
    /// Returns a [`DecryptionError`] describing the failure; never a placeholder value.
    pub async fn decrypt(&self, sealed: &SealedValue) -> Result<String, DecryptionError> {
        let handle = self.handle(&sealed.key_version).await?;
        let plaintext = handle.decrypt(&sealed.ciphertext).await?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }

    /// Parse an envelope string and open it.
    pub async fn decrypt_str(&self, envelope: &str) -> Result<String, DecryptionError> {
        let sealed: SealedValue = envelope.parse()?;
        self.decrypt(&sealed).await
    }

    /// Mint a new key version and make it active immediately.
    ///
    /// Existing ciphertext is left as is and stays decryptable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Key`] if the provider cannot create a version.
    pub async fn rotate(&self) -> Result<KeyVersion, EngineError> {
        let _guard = self.rotation.lock().await;
        let previous = self.active_version();
        let minted = self.provider.create_new_version(&self.key_name).await?;
        let version = minted.version;
        self.handles
            .write()
            .await
            .insert(version.clone(), minted.handle);
        self.active.store(Arc::new(version.clone()));
        info!(
            key_name = %self.key_name,
            previous = %previous,
            key_version = %version,
            "active key version rotated"
        );
        Ok(version)
    }

    /// Re-read the active version from the provider.
    ///
    /// Picks up rotations performed by other replicas.
    pub async fn refresh(&self) -> Result<KeyVersion, EngineError> {
        let _guard = self.rotation.lock().await;
        let latest = self.provider.get_active_version(&self.key_name).await?;
        if *self.active.load().as_ref() != latest {
            info!(
                key_name = %self.key_name,
                key_version = %latest,
                "picked up new active key version"
            );
            self.active.store(Arc::new(latest.clone()));
        }
        Ok(latest)
    }

    /// Fetch a cached crypto handle for `version`, asking the provider on a miss.
    async fn handle(
        &self,
        version: &KeyVersion,
    ) -> Result<Arc<dyn CryptoHandle>, KeyProviderError> {
        if let Some(handle) = self.handles.read().await.get(version) {
            return Ok(Arc::clone(handle));
        }
        let handle = self
            .provider
            .get_crypto_handle(&self.key_name, version)
            .await?;
        debug!(key_version = %version, "cached crypto handle");
        self.handles
            .write()
            .await
            .entry(version.clone())
            .or_insert_with(|| Arc::clone(&handle));
        Ok(handle)
    }
}

/// Spawn a background task that periodically re-reads the active key version.
///
/// The first refresh fires after one full interval. On failure the current
/// version is retained and a warning is emitted.
pub fn refresh_task(
    engine: Arc<EncryptionEngine>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // The first tick fires immediately; init already resolved the version.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = engine.refresh().await {
                warn!(error = %e, "key version refresh failed; retaining current version");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::LocalKeyProvider;

    async fn engine() -> (Arc<LocalKeyProvider>, EncryptionEngine) {
        let provider = Arc::new(LocalKeyProvider::with_initial_version("items").await.unwrap());
        let engine = EncryptionEngine::init(provider.clone(), "items").await.unwrap();
        (provider, engine)
    }

    #[tokio::test]
    async fn init_fails_without_versions() {
        let provider = Arc::new(LocalKeyProvider::new());
        assert!(EncryptionEngine::init(provider, "items").await.is_err());
    }

    #[tokio::test]
    async fn round_trips_assorted_strings() {
        let (_, engine) = engine().await;
        for s in ["", "a", "ab", "abc", "Alice", "naïve – ünïcödé", "line\nbreak|pipe"] {
            let sealed = engine.encrypt(s).await.unwrap();
            assert_eq!(engine.decrypt(&sealed).await.unwrap(), s);
        }
    }

    #[tokio::test]
    async fn envelope_string_round_trips_without_padding() {
        let (_, engine) = engine().await;
        let envelope = engine.encrypt("Alice").await.unwrap().to_string();
        let (b64, version) = envelope.rsplit_once('|').unwrap();
        let unpadded = format!("{}|{version}", b64.trim_end_matches('='));
        assert_eq!(engine.decrypt_str(&unpadded).await.unwrap(), "Alice");
    }

    #[tokio::test]
    async fn encrypt_tags_active_version() {
        let (_, engine) = engine().await;
        let sealed = engine.encrypt("Alice").await.unwrap();
        assert_eq!(sealed.key_version.as_str(), "v1");
        assert!(sealed.to_string().ends_with("|v1"));
    }

    #[tokio::test]
    async fn rotation_switches_new_encryptions_but_old_ones_still_open() {
        let (_, engine) = engine().await;
        let old = engine.encrypt("Alice").await.unwrap();

        let v2 = engine.rotate().await.unwrap();
        assert_eq!(v2.as_str(), "v2");
        assert_eq!(engine.active_version(), v2);

        let new = engine.encrypt("Alice").await.unwrap();
        assert_eq!(new.key_version, v2);
        assert_eq!(engine.decrypt(&old).await.unwrap(), "Alice");
        assert_eq!(engine.decrypt(&new).await.unwrap(), "Alice");
    }

    #[tokio::test]
    async fn unknown_version_is_a_typed_error() {
        let (_, engine) = engine().await;
        let mut sealed = engine.encrypt("Alice").await.unwrap();
        sealed.key_version = KeyVersion::new("v42").unwrap();
        assert_eq!(
            engine.decrypt(&sealed).await,
            Err(DecryptionError::UnknownVersion("v42".into()))
        );
    }

    #[tokio::test]
    async fn malformed_envelopes_are_typed_errors() {
        let (_, engine) = engine().await;
        assert_eq!(
            engine.decrypt_str("Alice").await,
            Err(DecryptionError::MissingSeparator)
        );
        assert!(matches!(
            engine.decrypt_str("%%%|v1").await,
            Err(DecryptionError::InvalidBase64(_))
        ));
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_a_crypto_error() {
        let (_, engine) = engine().await;
        let mut sealed = engine.encrypt("Alice").await.unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;
        assert!(matches!(
            engine.decrypt(&sealed).await,
            Err(DecryptionError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn refresh_picks_up_external_rotation() {
        let (provider, engine) = engine().await;
        let v2 = provider.create_new_version("items").await.unwrap().version;
        assert_eq!(engine.active_version().as_str(), "v1");
        assert_eq!(engine.refresh().await.unwrap(), v2);
        assert_eq!(engine.active_version(), v2);
    }

    #[tokio::test]
    async fn concurrent_rotations_mint_distinct_versions() {
        let (provider, engine) = engine().await;
        let engine = Arc::new(engine);
        let a = tokio::spawn({
            let engine = engine.clone();
            async move { engine.rotate().await.unwrap() }
        });
        let b = tokio::spawn({
            let engine = engine.clone();
            async move { engine.rotate().await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(a, b);
        assert_eq!(engine.active_version(), provider.get_active_version("items").await.unwrap());
    }

    /// Provider whose version listing only knows versions present at start.
    struct LaggingProvider {
        inner: LocalKeyProvider,
        visible: Vec<KeyVersion>,
    }

    #[async_trait::async_trait]
    impl KeyProvider for LaggingProvider {
        async fn list_versions(
            &self,
            key_name: &str,
        ) -> Result<Vec<crate::keys::KeyVersionInfo>, KeyProviderError> {
            let versions = self.inner.list_versions(key_name).await?;
            Ok(versions
                .into_iter()
                .filter(|info| self.visible.contains(&info.version))
                .collect())
        }

        async fn get_crypto_handle(
            &self,
            key_name: &str,
            version: &KeyVersion,
        ) -> Result<Arc<dyn CryptoHandle>, KeyProviderError> {
            if !self.visible.contains(version) {
                return Err(KeyProviderError::UnknownVersion {
                    key_name: key_name.to_owned(),
                    version: version.to_string(),
                });
            }
            self.inner.get_crypto_handle(key_name, version).await
        }

        async fn create_new_version(
            &self,
            key_name: &str,
        ) -> Result<crate::keys::MintedVersion, KeyProviderError> {
            self.inner.create_new_version(key_name).await
        }
    }

    #[tokio::test]
    async fn rotated_version_encrypts_before_provider_lists_it() {
        let provider = Arc::new(LaggingProvider {
            inner: LocalKeyProvider::with_initial_version("items").await.unwrap(),
            visible: vec![KeyVersion::new("v1").unwrap()],
        });
        let engine = EncryptionEngine::init(provider, "items").await.unwrap();

        let v2 = engine.rotate().await.unwrap();
        let sealed = engine.encrypt("Alice").await.unwrap();
        assert_eq!(sealed.key_version, v2);
        assert_eq!(engine.decrypt(&sealed).await.unwrap(), "Alice");
    }
}
