//! Key material.
//!
//! Keys are configured as base64url strings without padding and held in
//! [`Zeroizing`] buffers so they are scrubbed on drop. `Debug` output never
//! shows key bytes.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroizing;

use crate::error::{CipherError, Result};

/// AES-256 key length in bytes.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Shortest accepted HMAC-SHA512 key, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Length of generated HMAC-SHA512 keys (the hash block size).
pub const SIGNING_KEY_LEN: usize = 64;

fn decode_b64(field: &'static str, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim().as_bytes())
        .map(Zeroizing::new)
        .map_err(|e| CipherError::invalid_key(field, format!("not base64url: {e}")))
}

/// AES-256-GCM key.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; ENCRYPTION_KEY_LEN]>);

impl EncryptionKey {
    /// Parses a base64url key.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] if the input is not base64url or not
    /// exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = decode_b64("encryption_key", encoded)?;
        let key: [u8; ENCRYPTION_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::invalid_key(
                "encryption_key",
                format!("expected {ENCRYPTION_KEY_LEN} bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Random key from the OS generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; ENCRYPTION_KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    /// Base64url form, for writing into configuration.
    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE_NO_PAD.encode(&self.0[..]))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// HMAC-SHA512 key.
#[derive(Clone)]
pub struct SigningKey(Zeroizing<Vec<u8>>);

impl SigningKey {
    /// Parses a base64url key.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] if the input is not base64url or shorter
    /// than [`MIN_SIGNING_KEY_LEN`] bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = decode_b64("signing_key", encoded)?;
        if bytes.len() < MIN_SIGNING_KEY_LEN {
            return Err(CipherError::invalid_key(
                "signing_key",
                format!("expected at least {MIN_SIGNING_KEY_LEN} bytes, got {}", bytes.len()),
            ));
        }
        Ok(Self(bytes))
    }

    /// Random key from the OS generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = Zeroizing::new(vec![0u8; SIGNING_KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    /// Base64url form, for writing into configuration.
    #[must_use]
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE_NO_PAD.encode(&self.0[..]))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_round_trip_through_base64() {
        let key = EncryptionKey::generate();
        let parsed = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());

        let key = SigningKey::generate();
        let parsed = SigningKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());
    }

    #[test]
    fn wrong_length_encryption_key_is_rejected() {
        let short = URL_SAFE_NO_PAD.encode([7u8; 16]);
        let err = EncryptionKey::from_base64(&short).unwrap_err();
        assert!(matches!(err, CipherError::InvalidKey { field: "encryption_key", .. }));
    }

    #[test]
    fn short_signing_key_is_rejected() {
        let short = URL_SAFE_NO_PAD.encode([7u8; 8]);
        assert!(SigningKey::from_base64(&short).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(EncryptionKey::from_base64("not base64 at all!").is_err());
        assert!(SigningKey::from_base64("***").is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = SigningKey::generate();
        let debug = format!("{key:?}");
        assert_eq!(debug, "SigningKey(<redacted>)");
        assert!(!debug.contains(key.to_base64().as_str()));
    }
}
