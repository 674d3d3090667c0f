//! Error types for ticket replication.
//!
//! [`ReplicationError`] covers command encoding, transport failures and
//! the failure to apply a command locally. It converts into
//! [`TicketError`] so that callers that surface replication failures (the
//! reconciliation sweep, mostly) stay inside the registry's error taxonomy.

use tessera_tickets::TicketError;
use thiserror::Error;

use crate::command::MessageType;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors raised while publishing, receiving or applying commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplicationError {
    /// A command could not be encoded or decoded on the wire.
    #[error("Command encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A command is missing the field its message type requires.
    #[error("Malformed {message_type} command: {reason}")]
    MalformedCommand {
        /// Type of the offending command.
        message_type: MessageType,
        /// What is missing or inconsistent.
        reason: String,
    },

    /// The transport could not deliver or receive a command.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The subscriber fell behind and the transport dropped commands.
    #[error("Receiver lagged, {skipped} commands dropped")]
    Lagged {
        /// Number of commands that were never seen.
        skipped: u64,
    },

    /// Encoding, decoding or applying a ticket failed.
    #[error("Ticket error: {0}")]
    Ticket(#[from] TicketError),
}

impl ReplicationError {
    /// Creates a `MalformedCommand` error.
    #[must_use]
    pub fn malformed(message_type: MessageType, reason: impl Into<String>) -> Self {
        Self::MalformedCommand { message_type, reason: reason.into() }
    }

    /// Creates a `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl From<ReplicationError> for TicketError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::Ticket(inner) => inner,
            ReplicationError::Encoding(source) => {
                TicketError::serialization_with_source("replication command", source)
            },
            ReplicationError::Transport(message) => TicketError::unavailable(message),
            other => TicketError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ReplicationError::malformed(MessageType::Add, "missing payload").to_string(),
            "Malformed ADD command: missing payload"
        );
        assert_eq!(
            ReplicationError::Lagged { skipped: 3 }.to_string(),
            "Receiver lagged, 3 commands dropped"
        );
    }

    #[test]
    fn ticket_errors_pass_through_unchanged() {
        let err: TicketError = ReplicationError::from(TicketError::duplicate("ST-1")).into();
        assert!(matches!(err, TicketError::DuplicateTicket { .. }));
    }

    #[test]
    fn transport_errors_are_transient() {
        let err: TicketError = ReplicationError::transport("bus closed").into();
        assert!(err.is_transient());
    }
}
