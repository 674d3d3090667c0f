//! # Tessera Cipher
//!
//! Protection of ticket payloads at rest and ticket tokens in transit.
//!
//! This crate provides:
//! - **Cipher executor**: AES-256-GCM encryption and HMAC-SHA512 signing in four orderings (sign
//!   only, encrypt only, encrypt-then-sign, sign-then-encrypt)
//! - **Ticket codec**: a [`TicketCodec`](tessera_tickets::TicketCodec) that protects each ticket
//!   type with the keys its catalog entry configures and stores protected tickets under digested
//!   ids
//! - **Ticket tokens**: EdDSA-signed JWTs carrying a ticket id
//!
//! ## Features
//!
//! - Tampered, truncated or mis-keyed payloads surface as
//!   [`TicketError::InvalidCipherText`](tessera_tickets::TicketError::InvalidCipherText)
//! - Symmetric JWT algorithms and `none` are explicitly rejected
//! - Key material is zeroized on drop and redacted from `Debug`
//!
//! ## Example
//!
//! ```
//! use tessera_cipher::{CipherTicketCodec, keys::{EncryptionKey, SigningKey}};
//! use tessera_tickets::{
//!     CipherStrategy, CryptoConfig, MemoryTicketRegistry, TicketCatalog, TicketCodec, TicketRegistry,
//!     TicketRegistryConfig, testutil::ticket_granting_ticket_fixture_at,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let mut config = TicketRegistryConfig::default();
//! config.crypto.insert("TGT".into(), CryptoConfig {
//!     strategy: CipherStrategy::EncryptThenSign,
//!     encryption_key: Some(EncryptionKey::generate().to_base64()),
//!     signing_key: Some(SigningKey::generate().to_base64()),
//! });
//! let catalog = TicketCatalog::from_config(&config).unwrap();
//! let codec = CipherTicketCodec::new(catalog.clone()).unwrap();
//! let registry = MemoryTicketRegistry::builder()
//!     .catalog(catalog)
//!     .codec(std::sync::Arc::new(codec) as std::sync::Arc<dyn TicketCodec>)
//!     .build();
//!
//! let tgt = ticket_granting_ticket_fixture_at("TGT-1-abc", "casuser", chrono::Utc::now());
//! registry.add(tgt).await.unwrap();
//! assert!(registry.get("TGT-1-abc").await.unwrap().is_some());
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Catalog-driven ticket codec.
pub mod codec;
/// Cipher error types.
pub mod error;
/// Sign/encrypt pipelines.
pub mod executor;
/// JWT ticket tokens.
pub mod jwt;
/// Key material.
pub mod keys;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export key types for convenience
pub use codec::CipherTicketCodec;
pub use error::{CipherError, Result};
pub use executor::CipherExecutor;
pub use jwt::{FORBIDDEN_ALGORITHMS, TicketTokenClaims, TicketTokenCodec, validate_algorithm};
