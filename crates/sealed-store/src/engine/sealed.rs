//! The persisted `<base64-ciphertext>|<key-version>` envelope.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::DecryptionError;
use crate::keys::KeyVersion;

/// Separator between the ciphertext and the key version.
pub const SEPARATOR: char = '|';

/// An encrypted field value tagged with the key version that sealed it.
///
/// The string form is the persisted-state contract and must stay stable:
/// standard base64 of the ciphertext, `|`, then the version identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub ciphertext: Vec<u8>,
    pub key_version: KeyVersion,
}

impl fmt::Display for SealedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}",
            STANDARD.encode(&self.ciphertext),
            self.key_version
        )
    }
}

impl FromStr for SealedValue {
    type Err = DecryptionError;

    /// Parse an envelope, re-padding base64 that lost its trailing `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (encoded, version) = s
            .rsplit_once(SEPARATOR)
            .ok_or(DecryptionError::MissingSeparator)?;
        let key_version = KeyVersion::new(version)
            .map_err(|_| DecryptionError::InvalidVersion(version.to_owned()))?;
        let ciphertext = STANDARD
            .decode(repad(encoded))
            .map_err(|e| DecryptionError::InvalidBase64(e.to_string()))?;
        Ok(Self {
            ciphertext,
            key_version,
        })
    }
}

/// Append `=` until the length is a multiple of four.
fn repad(encoded: &str) -> String {
    let mut padded = encoded.to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}
