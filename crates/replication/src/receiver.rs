//! Command application.
//!
//! [`CommandReceiver`] applies commands published by other nodes to the
//! local registry. Its rules, in order:
//!
//! 1. A command whose origin is this node is an echo and is dropped.
//! 2. A command id applied within the dedupe window is a redelivery and is
//!    dropped.
//! 3. `ADD`/`UPDATE` is folded into the local copy with
//!    [`merge`](TicketRegistry::merge). Concurrent grants on different nodes
//!    are unioned and consumption is never undone; a copy that adds nothing
//!    is stale.
//! 4. `DELETE` of an absent id and `DELETE_ALL` on an empty registry are
//!    no-ops.
//!
//! The registry handed to the receiver must be the undecorated local one,
//! so applying a command never publishes it again.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use moka::future::Cache;
use tessera_tickets::{TicketCodec, TicketRegistry};
use tokio::select;
use uuid::Uuid;

use crate::{
    command::{MessageType, ReplicationCommand},
    config::ReplicationConfig,
    error::Result,
    identifier::PublisherIdentifier,
    task::TaskHandle,
};

/// What happened to a received command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The command changed the local registry.
    Applied,
    /// The command was published by this node.
    Echo,
    /// The command id was already applied.
    Redelivered,
    /// The local copy already holds everything the carried ticket does.
    Stale,
}

/// Applies replicated commands to a local registry.
#[derive(Clone)]
pub struct CommandReceiver {
    origin: PublisherIdentifier,
    registry: Arc<dyn TicketRegistry>,
    codec: Arc<dyn TicketCodec>,
    seen: Cache<Uuid, ()>,
}

impl fmt::Debug for CommandReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandReceiver")
            .field("origin", &self.origin)
            .field("seen", &self.seen.entry_count())
            .finish_non_exhaustive()
    }
}

impl CommandReceiver {
    /// Creates a receiver for the node identified by `origin`.
    pub fn new(
        origin: PublisherIdentifier,
        registry: Arc<dyn TicketRegistry>,
        codec: Arc<dyn TicketCodec>,
        config: &ReplicationConfig,
    ) -> Self {
        let seen = Cache::builder()
            .max_capacity(config.dedupe_capacity)
            .time_to_live(config.dedupe_ttl)
            .build();
        Self { origin, registry, codec, seen }
    }

    /// Parses and applies one frame.
    ///
    /// # Errors
    ///
    /// Same as [`apply`](Self::apply), plus encoding errors.
    pub async fn apply_frame(&self, frame: &[u8]) -> Result<ApplyOutcome> {
        self.apply(&ReplicationCommand::from_wire(frame)?).await
    }

    /// Applies one command.
    ///
    /// # Errors
    ///
    /// Malformed commands, payloads the codec rejects, and registry
    /// failures. The command id is only remembered when applying succeeds,
    /// so a failed command can be applied by a later redelivery.
    #[tracing::instrument(
        name = "apply_command",
        skip_all,
        fields(
            command_id = %command.command_id,
            origin_id = %command.origin_id,
            message_type = %command.message_type,
        ),
    )]
    pub async fn apply(&self, command: &ReplicationCommand) -> Result<ApplyOutcome> {
        if command.is_from(&self.origin) {
            tracing::trace!("dropping echo of own command");
            return Ok(ApplyOutcome::Echo);
        }
        if self.seen.contains_key(&command.command_id) {
            tracing::debug!("dropping redelivered command");
            return Ok(ApplyOutcome::Redelivered);
        }

        let outcome = match command.message_type {
            MessageType::Add | MessageType::Update => {
                let ticket = command.ticket(self.codec.as_ref())?;
                let id = ticket.id().to_string();
                let incoming = ticket.revision();
                match self.registry.merge(ticket).await? {
                    Some(stored) => {
                        tracing::debug!(ticket_id = %id, incoming, revision = stored.revision(), "applied replicated ticket");
                        ApplyOutcome::Applied
                    },
                    None => {
                        tracing::debug!(ticket_id = %id, incoming, "dropping stale command");
                        ApplyOutcome::Stale
                    },
                }
            },
            MessageType::Delete => {
                let removed = self.registry.delete(command.target_id()?).await?;
                tracing::debug!(removed, "applied replicated delete");
                ApplyOutcome::Applied
            },
            MessageType::DeleteAll => {
                let removed = self.registry.delete_all().await?;
                tracing::debug!(removed, "applied replicated delete-all");
                ApplyOutcome::Applied
            },
        };

        self.seen.insert(command.command_id, ()).await;
        Ok(outcome)
    }

    /// Applies frames from `frames` until the stream ends or the handle is
    /// dropped.
    ///
    /// Failed commands are logged and dropped.
    #[must_use = "dropping the handle stops the receiver"]
    pub fn spawn(self, frames: BoxStream<'static, Result<Bytes>>) -> TaskHandle {
        TaskHandle::spawn("receiver", move |shutdown_rx| self.run(frames, shutdown_rx))
    }

    async fn run(
        self,
        mut frames: BoxStream<'static, Result<Bytes>>,
        mut shutdown_rx: tokio::sync::watch::Receiver<()>,
    ) {
        tracing::debug!(origin_id = %self.origin, "replication receiver started");
        loop {
            select! {
                _ = shutdown_rx.changed() => break,
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        if let Err(err) = self.apply_frame(&frame).await {
                            tracing::warn!(error = %err, "dropping replication command");
                        }
                    },
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "replication commands lost");
                    },
                    None => {
                        tracing::debug!("replication transport closed");
                        break;
                    },
                },
            }
        }
    }
}
