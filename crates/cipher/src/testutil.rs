//! Shared test utilities for cipher testing.
//!
//! Key material is freshly generated on every call. Feature-gated behind
//! `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! tessera-cipher = { path = "../cipher", features = ["testutil"] }
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use rand_core::OsRng;
use tessera_tickets::{CipherStrategy, CryptoConfig, TicketCatalog, TicketRegistryConfig};

use crate::keys::{EncryptionKey, SigningKey};

/// Crypto settings for `strategy` with fresh keys.
///
/// Both keys are filled in regardless of strategy.
#[must_use]
pub fn crypto_config(strategy: CipherStrategy) -> CryptoConfig {
    CryptoConfig {
        strategy,
        encryption_key: Some(EncryptionKey::generate().to_base64()),
        signing_key: Some(SigningKey::generate().to_base64()),
    }
}

/// Default catalog with one shared [`crypto_config`] applied to `prefixes`.
///
/// # Panics
///
/// Panics if the resulting configuration does not build a catalog.
#[must_use]
#[allow(clippy::expect_used)]
pub fn catalog_with_crypto(prefixes: &[&str], strategy: CipherStrategy) -> TicketCatalog {
    let crypto = crypto_config(strategy);
    let mut config = TicketRegistryConfig::default();
    for prefix in prefixes {
        config.crypto.insert((*prefix).to_string(), crypto.clone());
    }
    TicketCatalog::from_config(&config).expect("crypto config builds a catalog")
}

/// Fresh Ed25519 key for ticket tokens, with its base64url seed.
#[must_use]
pub fn generate_token_key() -> (Ed25519SigningKey, String) {
    let key = Ed25519SigningKey::generate(&mut OsRng);
    let seed = URL_SAFE_NO_PAD.encode(key.to_bytes());
    (key, seed)
}

/// Raw `header.payload.` token with an empty signature.
///
/// For exercising rejection of `alg: "none"` and similar forgeries.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
#[allow(clippy::expect_used)]
pub fn craft_raw_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header json"));
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("payload json"));
    format!("{header}.{payload}.")
}
