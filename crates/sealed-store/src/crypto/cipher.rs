//! AES-256-GCM-SIV sealing and opening of byte strings.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so an accidental nonce collision degrades to revealing plaintext equality
//! rather than breaking authentication.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256GcmSiv, Nonce,
};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Errors produced by the cipher layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The sealed bytes are too short to contain a nonce and tag.
    #[error("sealed data truncated")]
    Truncated,

    /// AES-GCM-SIV encryption or decryption failed.
    #[error("aead operation failed")]
    AeadFailure,
}

/// Generate a fresh random 256-bit key using the OS CSPRNG.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Seal `plaintext` under `key`, returning `nonce || ciphertext+tag`.
///
/// A random 96-bit nonce is generated per call.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open bytes produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::Truncated`] if `sealed` is shorter than a nonce,
/// [`CipherError::AeadFailure`] if authentication fails (wrong key or tampered data).
pub fn open(sealed: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    if sealed.len() < NONCE_LEN {
        return Err(CipherError::Truncated);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = generate_key();
        let sealed = seal(b"Alice", &key).unwrap();
        assert_eq!(open(&sealed, &key).unwrap(), b"Alice");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = generate_key();
        let sealed = seal(b"", &key).unwrap();
        assert!(sealed.len() > NONCE_LEN);
        assert!(open(&sealed, &key).unwrap().is_empty());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(b"secret", &generate_key()).unwrap();
        assert_eq!(open(&sealed, &generate_key()), Err(CipherError::AeadFailure));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert_eq!(seal(b"x", &[0u8; 16]), Err(CipherError::InvalidKeyLength));
    }

    #[test]
    fn truncated_input_rejected() {
        let key = generate_key();
        assert_eq!(open(&[1, 2, 3], &key), Err(CipherError::Truncated));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = generate_key();
        let mut sealed = seal(b"tamper me", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(&sealed, &key).is_err());
    }
}
