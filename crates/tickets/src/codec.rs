//! Ticket encoding for storage and transport.
//!
//! A [`TicketCodec`] turns a [`Ticket`] into bytes and back, and decides the
//! key a ticket is stored under. [`JsonTicketCodec`] is the plain default;
//! the `tessera-cipher` crate provides a signing/encrypting codec driven by
//! the catalog's crypto settings.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use sha2::{Digest, Sha512};

use crate::{
    catalog::TicketCatalog,
    error::{TicketError, TicketResult},
    ticket::Ticket,
};

/// Encodes tickets to bytes and derives storage keys.
pub trait TicketCodec: Send + Sync + fmt::Debug {
    /// Serializes a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Serialization`] or a crypto failure.
    fn encode(&self, ticket: &Ticket) -> TicketResult<Bytes>;

    /// Restores a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidCipherText`] for tampered or mis-keyed
    /// payloads and [`TicketError::UnknownTicketType`] for well-formed payloads
    /// of an unregistered type.
    fn decode(&self, bytes: &[u8]) -> TicketResult<Ticket>;

    /// Key a ticket id is stored under.
    fn storage_key(&self, id: &str) -> String {
        id.to_string()
    }
}

/// SHA-512 digest of a ticket id, base64url without padding.
///
/// Used as the storage key when ticket payloads are protected so that
/// stored keys do not reveal usable ticket ids.
#[must_use]
pub fn digest_ticket_id(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha512::digest(id.as_bytes()))
}

/// Plain JSON codec.
///
/// With a catalog attached, decoding rejects tickets whose prefix is not
/// registered.
#[derive(Debug, Clone, Default)]
pub struct JsonTicketCodec {
    catalog: Option<TicketCatalog>,
}

impl JsonTicketCodec {
    /// Codec that accepts any ticket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that only accepts registered ticket types.
    #[must_use]
    pub fn with_catalog(catalog: TicketCatalog) -> Self {
        Self { catalog: Some(catalog) }
    }
}

impl TicketCodec for JsonTicketCodec {
    fn encode(&self, ticket: &Ticket) -> TicketResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(ticket)?))
    }

    fn decode(&self, bytes: &[u8]) -> TicketResult<Ticket> {
        let ticket: Ticket = serde_json::from_slice(bytes)?;
        if let Some(catalog) = &self.catalog {
            catalog.find(ticket.prefix())?;
        }
        Ok(ticket)
    }
}

/// Decodes a ticket and checks it carries the expected id.
///
/// # Errors
///
/// Propagates decode errors and returns [`TicketError::InvalidCipherText`]
/// when the payload belongs to another ticket.
pub fn decode_expecting(codec: &dyn TicketCodec, id: &str, bytes: &[u8]) -> TicketResult<Ticket> {
    let ticket = codec.decode(bytes)?;
    if ticket.id() != id {
        return Err(TicketError::invalid_cipher_text(format!(
            "payload for {} stored under {id}",
            ticket.id()
        )));
    }
    Ok(ticket)
}
