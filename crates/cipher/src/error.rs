//! Cipher error types.
//!
//! [`CipherError`] covers key parsing, payload protection and ticket token
//! failures. Registry-facing code converts it into
//! [`TicketError`](tessera_tickets::TicketError): every payload or token
//! failure becomes `InvalidCipherText`, key problems become configuration
//! errors.

use tessera_tickets::{ConfigError, TicketError};
use thiserror::Error;

/// Errors raised while protecting or verifying ticket payloads and tokens.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CipherError {
    /// Key material could not be used.
    #[error("Invalid key for {field}: {reason}")]
    InvalidKey {
        /// Which key was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A key required by the strategy was not configured.
    #[error("Missing key: {0}")]
    MissingKey(&'static str),

    /// Payload is truncated or carries an unexpected header.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// HMAC verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// AEAD decryption failed (wrong key or modified cipher text).
    #[error("Decryption failed")]
    DecryptionFailed,

    /// AEAD encryption failed.
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Token structure or claims could not be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Audience does not match the expected service.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// Issuer does not match.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Algorithm is not accepted.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl CipherError {
    /// Creates an `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidKey { field, reason: reason.into() }
    }

    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Whether the error comes from key material rather than a payload.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::InvalidKey { .. } | Self::MissingKey(_))
    }
}

impl From<jsonwebtoken::errors::Error> for CipherError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => Self::InvalidTokenFormat("Invalid JWT structure".into()),
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidAudience => Self::InvalidAudience("Audience validation failed".into()),
            ErrorKind::InvalidIssuer => Self::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                Self::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::InvalidTokenFormat(format!("missing claim: {claim}"))
            },
            _ => Self::InvalidTokenFormat(format!("JWT error: {err}")),
        }
    }
}

impl From<CipherError> for TicketError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::InvalidKey { field, reason } => ConfigError::Invalid { field, reason }.into(),
            CipherError::MissingKey(field) => ConfigError::Missing { field }.into(),
            CipherError::EncryptionFailed => TicketError::internal("ticket encryption failed"),
            other => TicketError::invalid_cipher_text_with_source("ticket payload rejected", other),
        }
    }
}

/// Result type alias for cipher operations.
pub type Result<T> = std::result::Result<T, CipherError>;
