//! Replication command schema.
//!
//! A command travels as JSON:
//!
//! ```json
//! {
//!   "command_id": "5f0c6c1e-8a0d-4c43-9d1e-3f2b7b1d2a90",
//!   "origin_id": "node-a",
//!   "message_type": "ADD",
//!   "ticket_id": "ST-1-abc",
//!   "ticket_payload": "AlNUeyJpZCI6..."
//! }
//! ```
//!
//! `ticket_payload` is the ticket as encoded by the node's
//! [`TicketCodec`] (so protected ticket types stay protected on the wire),
//! base64url without padding. `DELETE` carries only `ticket_id`,
//! `DELETE_ALL` carries neither.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tessera_tickets::{Ticket, TicketCodec};
use uuid::Uuid;

use crate::{
    error::{ReplicationError, Result},
    identifier::PublisherIdentifier,
};

/// What a command does to the receiving registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// A ticket was created.
    Add,
    /// A stored ticket changed.
    Update,
    /// One ticket was removed.
    Delete,
    /// Every ticket was removed.
    DeleteAll,
}

impl MessageType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::DeleteAll => "DELETE_ALL",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replicated registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCommand {
    /// Unique per command; redeliveries share it.
    pub command_id: Uuid,
    /// Node that performed the write.
    pub origin_id: PublisherIdentifier,
    /// Kind of mutation.
    pub message_type: MessageType,
    /// Affected ticket, absent for `DELETE_ALL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// Encoded ticket for `ADD` and `UPDATE`.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "payload")]
    pub ticket_payload: Option<Bytes>,
}

impl ReplicationCommand {
    fn carrying(
        message_type: MessageType,
        origin: &PublisherIdentifier,
        ticket: &Ticket,
        codec: &dyn TicketCodec,
    ) -> Result<Self> {
        Ok(Self {
            command_id: Uuid::new_v4(),
            origin_id: origin.clone(),
            message_type,
            ticket_id: Some(ticket.id().to_string()),
            ticket_payload: Some(codec.encode(ticket)?),
        })
    }

    /// `ADD` for a newly stored ticket.
    ///
    /// # Errors
    ///
    /// Propagates codec failures.
    pub fn add(
        origin: &PublisherIdentifier,
        ticket: &Ticket,
        codec: &dyn TicketCodec,
    ) -> Result<Self> {
        Self::carrying(MessageType::Add, origin, ticket, codec)
    }

    /// `UPDATE` for a changed ticket.
    ///
    /// # Errors
    ///
    /// Propagates codec failures.
    pub fn update(
        origin: &PublisherIdentifier,
        ticket: &Ticket,
        codec: &dyn TicketCodec,
    ) -> Result<Self> {
        Self::carrying(MessageType::Update, origin, ticket, codec)
    }

    /// `DELETE` for one ticket id.
    #[must_use]
    pub fn delete(origin: &PublisherIdentifier, id: &str) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            origin_id: origin.clone(),
            message_type: MessageType::Delete,
            ticket_id: Some(id.to_string()),
            ticket_payload: None,
        }
    }

    /// `DELETE_ALL`.
    #[must_use]
    pub fn delete_all(origin: &PublisherIdentifier) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            origin_id: origin.clone(),
            message_type: MessageType::DeleteAll,
            ticket_id: None,
            ticket_payload: None,
        }
    }

    /// Whether this node published the command.
    #[must_use]
    pub fn is_from(&self, origin: &PublisherIdentifier) -> bool {
        &self.origin_id == origin
    }

    /// Decodes the carried ticket and checks it matches `ticket_id`.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::MalformedCommand`] when the payload is missing or
    /// belongs to another id; codec failures as [`ReplicationError::Ticket`].
    pub fn ticket(&self, codec: &dyn TicketCodec) -> Result<Ticket> {
        let payload = self
            .ticket_payload
            .as_ref()
            .ok_or_else(|| ReplicationError::malformed(self.message_type, "missing ticket payload"))?;
        let ticket = codec.decode(payload)?;
        if self.ticket_id.as_deref() != Some(ticket.id()) {
            return Err(ReplicationError::malformed(
                self.message_type,
                format!("payload holds {} but command names {:?}", ticket.id(), self.ticket_id),
            ));
        }
        Ok(ticket)
    }

    /// The ticket id of a `DELETE`.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::MalformedCommand`] when the id is missing.
    pub fn target_id(&self) -> Result<&str> {
        self.ticket_id
            .as_deref()
            .ok_or_else(|| ReplicationError::malformed(self.message_type, "missing ticket id"))
    }

    /// Serializes the command for the transport.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Encoding`] if JSON serialization fails.
    pub fn to_wire(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parses a command received from the transport.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Encoding`] for malformed JSON.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod payload {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        payload: &Option<Bytes>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match payload {
            Some(bytes) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| URL_SAFE_NO_PAD.decode(s).map(Bytes::from).map_err(serde::de::Error::custom))
            .transpose()
    }
}
