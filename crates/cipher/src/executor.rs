//! Payload protection for one ticket type.
//!
//! A [`CipherExecutor`] applies one [`CipherStrategy`] with AES-256-GCM for
//! confidentiality and HMAC-SHA512 for integrity. Every protected payload
//! starts with a one-byte header naming the strategy, followed by:
//!
//! | Strategy | Body |
//! |----------|------|
//! | `SignOnly` | `plain ‖ mac(header ‖ aad ‖ plain)` |
//! | `EncryptOnly` | `nonce ‖ seal(plain)` |
//! | `EncryptThenSign` | `nonce ‖ seal(plain) ‖ mac(header ‖ aad ‖ nonce ‖ sealed)` |
//! | `SignThenEncrypt` | `nonce ‖ seal(plain ‖ mac(header ‖ aad ‖ plain))` |
//!
//! `seal` authenticates `header ‖ aad` as associated data, so a payload only
//! opens under the strategy and context it was produced for.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha512;
use tessera_tickets::{CipherStrategy, CryptoConfig};

use crate::{
    error::{CipherError, Result},
    keys::{EncryptionKey, SigningKey},
};

type HmacSha512 = Hmac<Sha512>;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// HMAC-SHA512 tag length in bytes.
pub const MAC_LEN: usize = 64;

const fn header_byte(strategy: CipherStrategy) -> u8 {
    match strategy {
        CipherStrategy::SignOnly => 0x01,
        CipherStrategy::EncryptOnly => 0x02,
        CipherStrategy::EncryptThenSign => 0x03,
        CipherStrategy::SignThenEncrypt => 0x04,
    }
}

/// Signs and/or encrypts payloads with one strategy and key set.
#[derive(Debug, Clone)]
pub struct CipherExecutor {
    strategy: CipherStrategy,
    encryption_key: Option<EncryptionKey>,
    signing_key: Option<SigningKey>,
}

impl CipherExecutor {
    /// Builds an executor, checking that the strategy's keys are present.
    ///
    /// # Errors
    ///
    /// [`CipherError::MissingKey`] when a required key is absent.
    pub fn new(
        strategy: CipherStrategy,
        encryption_key: Option<EncryptionKey>,
        signing_key: Option<SigningKey>,
    ) -> Result<Self> {
        if strategy.encrypts() && encryption_key.is_none() {
            return Err(CipherError::MissingKey("encryption_key"));
        }
        if strategy.signs() && signing_key.is_none() {
            return Err(CipherError::MissingKey("signing_key"));
        }
        Ok(Self { strategy, encryption_key, signing_key })
    }

    /// Builds an executor from catalog crypto settings.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] for unparsable keys and
    /// [`CipherError::MissingKey`] for absent required keys.
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        let encryption_key = match &config.encryption_key {
            Some(key) if config.strategy.encrypts() => Some(EncryptionKey::from_base64(key)?),
            _ => None,
        };
        let signing_key = match &config.signing_key {
            Some(key) if config.strategy.signs() => Some(SigningKey::from_base64(key)?),
            _ => None,
        };
        Self::new(config.strategy, encryption_key, signing_key)
    }

    /// The strategy this executor applies.
    #[must_use]
    pub fn strategy(&self) -> CipherStrategy {
        self.strategy
    }

    /// Protects `plain`, binding it to `aad`.
    ///
    /// # Errors
    ///
    /// [`CipherError::EncryptionFailed`] if the AEAD rejects the input.
    pub fn encode(&self, plain: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let header = header_byte(self.strategy);
        let mut out = vec![header];
        match self.strategy {
            CipherStrategy::SignOnly => {
                out.extend_from_slice(plain);
                let mac = self.mac(header, aad, &[plain])?;
                out.extend_from_slice(&mac);
            },
            CipherStrategy::EncryptOnly => {
                out.extend_from_slice(&self.seal(header, aad, plain)?);
            },
            CipherStrategy::EncryptThenSign => {
                let sealed = self.seal(header, aad, plain)?;
                let mac = self.mac(header, aad, &[sealed.as_slice()])?;
                out.extend_from_slice(&sealed);
                out.extend_from_slice(&mac);
            },
            CipherStrategy::SignThenEncrypt => {
                let mut signed = plain.to_vec();
                signed.extend_from_slice(&self.mac(header, aad, &[plain])?);
                out.extend_from_slice(&self.seal(header, aad, &signed)?);
            },
        }
        Ok(out)
    }

    /// Verifies and opens a payload produced by [`encode`](Self::encode)
    /// with the same keys and `aad`.
    ///
    /// # Errors
    ///
    /// [`CipherError::Malformed`] for truncated input or a header of another
    /// strategy, [`CipherError::InvalidSignature`] or
    /// [`CipherError::DecryptionFailed`] for tampered or mis-keyed input.
    pub fn decode(&self, protected: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let header = header_byte(self.strategy);
        let Some((&found, body)) = protected.split_first() else {
            return Err(CipherError::malformed("empty payload"));
        };
        if found != header {
            return Err(CipherError::malformed(format!(
                "header {found:#04x} does not match strategy {:?}",
                self.strategy
            )));
        }

        match self.strategy {
            CipherStrategy::SignOnly => {
                let (plain, mac) = split_tail(body, MAC_LEN)?;
                self.verify(header, aad, &[plain], mac)?;
                Ok(plain.to_vec())
            },
            CipherStrategy::EncryptOnly => self.open(header, aad, body),
            CipherStrategy::EncryptThenSign => {
                let (sealed, mac) = split_tail(body, MAC_LEN)?;
                self.verify(header, aad, &[sealed], mac)?;
                self.open(header, aad, sealed)
            },
            CipherStrategy::SignThenEncrypt => {
                let signed = self.open(header, aad, body)?;
                let (plain, mac) = split_tail(&signed, MAC_LEN)?;
                self.verify(header, aad, &[plain], mac)?;
                Ok(plain.to_vec())
            },
        }
    }

    fn hmac(&self, header: u8, aad: &[u8], parts: &[&[u8]]) -> Result<HmacSha512> {
        let key = self.signing_key.as_ref().ok_or(CipherError::MissingKey("signing_key"))?;
        let mut mac = <HmacSha512 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|e| CipherError::invalid_key("signing_key", e.to_string()))?;
        mac.update(&[header]);
        mac.update(aad);
        for part in parts {
            mac.update(part);
        }
        Ok(mac)
    }

    fn mac(&self, header: u8, aad: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
        Ok(self.hmac(header, aad, parts)?.finalize().into_bytes().to_vec())
    }

    fn verify(&self, header: u8, aad: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<()> {
        self.hmac(header, aad, parts)?.verify_slice(tag).map_err(|_| CipherError::InvalidSignature)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.encryption_key.as_ref().ok_or(CipherError::MissingKey("encryption_key"))?;
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CipherError::invalid_key("encryption_key", e.to_string()))
    }

    fn seal(&self, header: u8, aad: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let associated = associated_data(header, aad);
        let sealed = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plain, aad: &associated })
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open(&self, header: u8, aad: &[u8], body: &[u8]) -> Result<Vec<u8>> {
        if body.len() < NONCE_LEN {
            return Err(CipherError::malformed("payload shorter than nonce"));
        }
        let (nonce, sealed) = body.split_at(NONCE_LEN);
        let associated = associated_data(header, aad);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &associated })
            .map_err(|_| CipherError::DecryptionFailed)
    }
}

fn associated_data(header: u8, aad: &[u8]) -> Vec<u8> {
    let mut associated = Vec::with_capacity(1 + aad.len());
    associated.push(header);
    associated.extend_from_slice(aad);
    associated
}

fn split_tail(bytes: &[u8], tail: usize) -> Result<(&[u8], &[u8])> {
    if bytes.len() < tail {
        return Err(CipherError::malformed("payload shorter than signature"));
    }
    Ok(bytes.split_at(bytes.len() - tail))
}
