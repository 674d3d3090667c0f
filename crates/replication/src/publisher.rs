//! Command publishing.

use std::{fmt, sync::Arc};

use tessera_tickets::{Ticket, TicketCodec};

use crate::{
    command::ReplicationCommand, error::Result, identifier::PublisherIdentifier,
    transport::CommandTransport,
};

/// Builds commands stamped with this node's identifier and broadcasts them.
///
/// Publishing is best effort: a failure is logged and swallowed so the
/// local write it follows still succeeds. Peers that miss a command catch
/// up through reconciliation.
#[derive(Clone)]
pub struct CommandPublisher {
    origin: PublisherIdentifier,
    transport: Arc<dyn CommandTransport>,
    codec: Arc<dyn TicketCodec>,
}

impl fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPublisher")
            .field("origin", &self.origin)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl CommandPublisher {
    /// Creates a publisher for `origin`.
    pub fn new(
        origin: PublisherIdentifier,
        transport: Arc<dyn CommandTransport>,
        codec: Arc<dyn TicketCodec>,
    ) -> Self {
        Self { origin, transport, codec }
    }

    /// This node's identifier.
    #[must_use]
    pub fn origin(&self) -> &PublisherIdentifier {
        &self.origin
    }

    /// Broadcasts `ADD` for a stored ticket.
    pub async fn added(&self, ticket: &Ticket) {
        let command = ReplicationCommand::add(&self.origin, ticket, self.codec.as_ref());
        self.publish_built(command, ticket.id()).await;
    }

    /// Broadcasts `UPDATE` for a changed ticket.
    pub async fn updated(&self, ticket: &Ticket) {
        let command = ReplicationCommand::update(&self.origin, ticket, self.codec.as_ref());
        self.publish_built(command, ticket.id()).await;
    }

    /// Broadcasts `DELETE` for one id.
    pub async fn deleted(&self, id: &str) {
        self.publish_built(Ok(ReplicationCommand::delete(&self.origin, id)), id).await;
    }

    /// Broadcasts `DELETE_ALL`.
    pub async fn deleted_all(&self) {
        self.publish_built(Ok(ReplicationCommand::delete_all(&self.origin)), "*").await;
    }

    /// Sends one command and reports the outcome.
    ///
    /// # Errors
    ///
    /// Encoding or transport failures.
    pub async fn publish(&self, command: &ReplicationCommand) -> Result<()> {
        self.transport.publish(command.to_wire()?).await?;
        tracing::debug!(
            command_id = %command.command_id,
            message_type = %command.message_type,
            ticket_id = command.ticket_id.as_deref(),
            "published replication command",
        );
        Ok(())
    }

    async fn publish_built(&self, command: Result<ReplicationCommand>, ticket_id: &str) {
        let outcome = match command {
            Ok(command) => self.publish(&command).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            tracing::warn!(
                origin_id = %self.origin,
                ticket_id,
                error = %err,
                "failed to publish replication command",
            );
        }
    }
}
