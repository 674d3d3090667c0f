//! JWT-shaped ticket tokens.
//!
//! Hands a ticket id to an external client as an EdDSA-signed JWT and
//! verifies it back. Claims:
//!
//! ```json
//! {
//!   "iss": "https://sso.example.org",
//!   "sub": "casuser",
//!   "aud": "https://app.example.org",
//!   "jti": "ST-1-abc",
//!   "iat": 1704067200,
//!   "exp": 1704067210
//! }
//! ```
//!
//! `exp` is the ticket's creation time plus its policy's time-to-live (or
//! [`DEFAULT_TOKEN_TTL`] for policies without one). Only EdDSA is issued and
//! accepted; symmetric algorithms and `none` are always rejected.

use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tessera_tickets::Ticket;
use zeroize::Zeroizing;

use crate::error::{CipherError, Result};

/// Lifetime of tokens for tickets whose policy has no time-to-live.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(8 * 3600);

/// Algorithms that are never accepted.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// PKCS#8 v1 prefix for a raw 32-byte Ed25519 private key.
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, algorithm identifier
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes
];

/// Claims of a ticket token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTokenClaims {
    /// Issuing server.
    pub iss: String,
    /// Principal id, or the ticket id for tickets without one.
    pub sub: String,
    /// Service the ticket was issued for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Ticket id.
    pub jti: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
}

/// Rejects forbidden and unsupported algorithms.
///
/// # Errors
///
/// [`CipherError::UnsupportedAlgorithm`] for anything other than `EdDSA`.
///
/// ```
/// use tessera_cipher::jwt::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("RS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<()> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(CipherError::UnsupportedAlgorithm(format!(
            "{alg} is forbidden for ticket tokens"
        )));
    }
    if alg != "EdDSA" {
        return Err(CipherError::UnsupportedAlgorithm(alg.to_string()));
    }
    Ok(())
}

/// Issues and verifies ticket tokens with one Ed25519 key pair.
#[derive(Clone)]
pub struct TicketTokenCodec {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for TicketTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketTokenCodec").field("issuer", &self.issuer).finish_non_exhaustive()
    }
}

impl TicketTokenCodec {
    /// Builds a codec from an Ed25519 signing key.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] if the public half cannot be loaded.
    pub fn new(issuer: impl Into<String>, signing_key: &Ed25519SigningKey) -> Result<Self> {
        let private: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8 = Zeroizing::new(ED25519_PKCS8_PREFIX.to_vec());
        pkcs8.extend_from_slice(&private[..]);
        let encoding_key = EncodingKey::from_ed_der(&pkcs8);

        let public = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());
        let decoding_key = DecodingKey::from_ed_components(&public)
            .map_err(|e| CipherError::invalid_key("token_key", e.to_string()))?;

        Ok(Self { issuer: issuer.into(), encoding_key, decoding_key })
    }

    /// Builds a codec from a base64url-encoded 32-byte Ed25519 seed.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] for malformed key material.
    pub fn from_base64(issuer: impl Into<String>, seed: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(seed.trim().as_bytes())
                .map_err(|e| CipherError::invalid_key("token_key", format!("not base64url: {e}")))?,
        );
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CipherError::invalid_key("token_key", "expected a 32-byte seed"))?,
        );
        Self::new(issuer, &Ed25519SigningKey::from_bytes(&seed))
    }

    /// The `iss` claim of issued tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Claims for `ticket`.
    #[must_use]
    pub fn claims_for(&self, ticket: &Ticket) -> TicketTokenClaims {
        let iat = ticket.creation_time().timestamp().max(0) as u64;
        let ttl = ticket.expiration_policy().time_to_live().unwrap_or(DEFAULT_TOKEN_TTL);
        TicketTokenClaims {
            iss: self.issuer.clone(),
            sub: ticket.principal_id().unwrap_or(ticket.id()).to_string(),
            aud: ticket.service().map(|s| s.id.clone()),
            jti: ticket.id().to_string(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
        }
    }

    /// Signs a token for `ticket`.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidTokenFormat`] if signing fails.
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id()))]
    pub fn encode(&self, ticket: &Ticket) -> Result<String> {
        let claims = self.claims_for(ticket);
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)?)
    }

    /// Verifies a token and returns its claims.
    ///
    /// When `expected_audience` is given the `aud` claim must equal it.
    ///
    /// # Errors
    ///
    /// [`CipherError::UnsupportedAlgorithm`] for a non-EdDSA header,
    /// [`CipherError::InvalidSignature`], [`CipherError::TokenExpired`],
    /// [`CipherError::InvalidIssuer`] or [`CipherError::InvalidAudience`].
    pub fn decode(&self, token: &str, expected_audience: Option<&str>) -> Result<TicketTokenClaims> {
        let header = decode_header(token)
            .map_err(|e| CipherError::InvalidTokenFormat(format!("Failed to decode header: {e}")))?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<TicketTokenClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Verifies a token and returns the ticket id it carries.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode).
    pub fn ticket_id(&self, token: &str, expected_audience: Option<&str>) -> Result<String> {
        Ok(self.decode(token, expected_audience)?.jti)
    }
}
