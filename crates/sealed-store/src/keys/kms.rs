//! AWS KMS–backed key provider.
//!
//! Each version is a KMS asymmetric `RSA_2048` key used with
//! `RSAES_OAEP_SHA_256`. A version is registered under the alias
//! `alias/<key_name>/<key_id>`, so enumerating a key's versions is a
//! paginated `ListAliases` filtered by prefix, and the alias creation date
//! orders them.
//!
//! RSA-2048 with OAEP/SHA-256 accepts at most 190 bytes of plaintext per
//! call; longer values fail with [`KeyProviderError::Crypto`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::{Blob, DateTime};
use aws_sdk_kms::types::{EncryptionAlgorithmSpec, KeySpec, KeyUsageType};
use tracing::info;

use super::{
    CryptoHandle, KeyProvider, KeyProviderError, KeyVersion, KeyVersionInfo, MintedVersion,
};

const ALGORITHM: EncryptionAlgorithmSpec = EncryptionAlgorithmSpec::RsaesOaepSha256;

/// Key provider backed by AWS KMS.
#[derive(Clone, Debug)]
pub struct KmsKeyProvider {
    kms: aws_sdk_kms::Client,
}

impl KmsKeyProvider {
    pub fn new(kms: aws_sdk_kms::Client) -> Self {
        Self { kms }
    }
}

/// Alias prefix under which every version of `key_name` is registered.
fn alias_prefix(key_name: &str) -> String {
    format!("alias/{key_name}/")
}

fn to_system_time(date: &DateTime) -> SystemTime {
    let secs = u64::try_from(date.secs()).unwrap_or(0);
    UNIX_EPOCH + Duration::new(secs, date.subsec_nanos())
}

fn provider_error(context: &str, err: impl std::error::Error) -> KeyProviderError {
    KeyProviderError::Provider(format!("{context}: {}", DisplayErrorContext(err)))
}

struct KmsHandle {
    kms: aws_sdk_kms::Client,
    key_id: String,
}

#[async_trait]
impl CryptoHandle for KmsHandle {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let resp = self
            .kms
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext))
            .encryption_algorithm(ALGORITHM)
            .send()
            .await
            .map_err(|e| KeyProviderError::Crypto(DisplayErrorContext(e).to_string()))?;
        resp.ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KeyProviderError::Crypto("KMS encrypt returned no ciphertext".into()))
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let resp = self
            .kms
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .encryption_algorithm(ALGORITHM)
            .send()
            .await
            .map_err(|e| KeyProviderError::Crypto(DisplayErrorContext(e).to_string()))?;
        resp.plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| KeyProviderError::Crypto("KMS decrypt returned no plaintext".into()))
    }
}

#[async_trait]
impl KeyProvider for KmsKeyProvider {
    async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersionInfo>, KeyProviderError> {
        let prefix = alias_prefix(key_name);
        let mut versions = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .kms
                .list_aliases()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| provider_error("failed to list KMS aliases", e))?;

            for alias in page.aliases() {
                let Some(name) = alias.alias_name() else { continue };
                if !name.starts_with(&prefix) {
                    continue;
                }
                let Some(key_id) = alias.target_key_id() else { continue };
                let created_at = alias
                    .creation_date()
                    .map(to_system_time)
                    .unwrap_or(UNIX_EPOCH);
                versions.push(KeyVersionInfo {
                    version: KeyVersion::new(key_id)?,
                    created_at,
                });
            }

            match page.next_marker() {
                Some(next) if page.truncated() => marker = Some(next.to_owned()),
                _ => break,
            }
        }

        Ok(versions)
    }

    async fn get_crypto_handle(
        &self,
        key_name: &str,
        version: &KeyVersion,
    ) -> Result<Arc<dyn CryptoHandle>, KeyProviderError> {
        // Only ids registered under this key's alias prefix are usable.
        let known = self
            .list_versions(key_name)
            .await?
            .into_iter()
            .any(|info| &info.version == version);
        if !known {
            return Err(KeyProviderError::UnknownVersion {
                key_name: key_name.to_owned(),
                version: version.to_string(),
            });
        }
        Ok(Arc::new(KmsHandle {
            kms: self.kms.clone(),
            key_id: version.as_str().to_owned(),
        }))
    }

    async fn create_new_version(&self, key_name: &str) -> Result<MintedVersion, KeyProviderError> {
        let created = self
            .kms
            .create_key()
            .key_spec(KeySpec::Rsa2048)
            .key_usage(KeyUsageType::EncryptDecrypt)
            .description(format!("sealed-store field key {key_name}"))
            .send()
            .await
            .map_err(|e| provider_error("failed to create KMS key", e))?;

        let key_id = created
            .key_metadata()
            .map(|meta| meta.key_id().to_owned())
            .ok_or_else(|| {
                KeyProviderError::Provider("CreateKey returned no key metadata".into())
            })?;

        self.kms
            .create_alias()
            .alias_name(format!("{}{key_id}", alias_prefix(key_name)))
            .target_key_id(&key_id)
            .send()
            .await
            .map_err(|e| provider_error("failed to register KMS key alias", e))?;

        info!(key_name, key_version = %key_id, "created KMS key version");
        // ListAliases can lag CreateAlias.
        Ok(MintedVersion {
            version: KeyVersion::new(key_id.as_str())?,
            handle: Arc::new(KmsHandle {
                kms: self.kms.clone(),
                key_id,
            }),
        })
    }
}
