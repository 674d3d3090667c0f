//! Replicating decorator for [`TicketRegistry`] implementations.
//!
//! Every successful write on the wrapped registry is followed by a command
//! on the shared channel. Reads pass through. Failed writes publish
//! nothing, and a failed publish never fails the write.
//!
//! With an authority attached, writes are also carried to it before they
//! are published: stored tickets are merged into the authority after the
//! local write, and deletions reach the authority before the local
//! registry. The reconciler treats the authority as the truth, so a ticket
//! this node created is never mistaken for one the authority dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tessera_tickets::{Ticket, TicketRegistry, TicketResult};

use crate::publisher::CommandPublisher;

/// Decorator that broadcasts the writes of a [`TicketRegistry`].
///
/// | Write | Command |
/// |-------|---------|
/// | `add` | `ADD` of the stored ticket |
/// | `update`, `compare_and_update`, `put` | `UPDATE` of the stored ticket |
/// | `add_child` | `ADD` of the child, then `UPDATE` of the parent |
/// | `delete` | `DELETE` of the id |
/// | `merge` | `UPDATE` of the stored ticket, when it changed |
/// | `delete_all` | `DELETE_ALL` |
#[derive(Clone)]
pub struct ReplicatingTicketRegistry<R> {
    inner: R,
    publisher: CommandPublisher,
    authority: Option<Arc<dyn TicketRegistry>>,
}

impl<R: std::fmt::Debug> std::fmt::Debug for ReplicatingTicketRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatingTicketRegistry")
            .field("inner", &self.inner)
            .field("publisher", &self.publisher)
            .field("authority", &self.authority.is_some())
            .finish()
    }
}

impl<R: TicketRegistry> ReplicatingTicketRegistry<R> {
    /// Wraps `inner`, publishing through `publisher`.
    pub fn new(inner: R, publisher: CommandPublisher) -> Self {
        Self { inner, publisher, authority: None }
    }

    /// Also writes through to `authority`.
    #[must_use]
    pub fn with_authority(mut self, authority: Arc<dyn TicketRegistry>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// The publisher commands go through.
    pub fn publisher(&self) -> &CommandPublisher {
        &self.publisher
    }

    async fn mirror(&self, stored: &Ticket) -> TicketResult<()> {
        if let Some(authority) = &self.authority {
            authority.merge(stored.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: TicketRegistry> TicketRegistry for ReplicatingTicketRegistry<R> {
    async fn add(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let stored = self.inner.add(ticket).await?;
        if let Err(err) = self.mirror(&stored).await {
            if let Err(undo) = self.inner.delete(stored.id()).await {
                tracing::warn!(ticket_id = stored.id(), error = %undo, "could not undo local add");
            }
            return Err(err);
        }
        self.publisher.added(&stored).await;
        Ok(stored)
    }

    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        self.inner.get(id).await
    }

    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
        self.inner.load(id).await
    }

    async fn update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let stored = self.inner.update(ticket).await?;
        self.mirror(&stored).await?;
        self.publisher.updated(&stored).await;
        Ok(stored)
    }

    async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let stored = self.inner.compare_and_update(ticket).await?;
        self.mirror(&stored).await?;
        self.publisher.updated(&stored).await;
        Ok(stored)
    }

    async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)> {
        let (child, parent) = self.inner.add_child(child, parent).await?;
        self.mirror(&child).await?;
        self.mirror(&parent).await?;
        self.publisher.added(&child).await;
        self.publisher.updated(&parent).await;
        Ok((child, parent))
    }

    async fn put(&self, ticket: Ticket) -> TicketResult<()> {
        self.inner.put(ticket.clone()).await?;
        self.mirror(&ticket).await?;
        self.publisher.updated(&ticket).await;
        Ok(())
    }

    async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>> {
        let merged = self.inner.merge(ticket).await?;
        if let Some(stored) = &merged {
            self.mirror(stored).await?;
            self.publisher.updated(stored).await;
        }
        Ok(merged)
    }

    async fn delete(&self, id: &str) -> TicketResult<u64> {
        if let Some(authority) = &self.authority {
            authority.delete(id).await?;
        }
        let removed = self.inner.delete(id).await?;
        // Peers may still hold a copy this node never saw.
        self.publisher.deleted(id).await;
        Ok(removed)
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        if let Some(authority) = &self.authority {
            authority.delete_all().await?;
        }
        let removed = self.inner.delete_all().await?;
        self.publisher.deleted_all().await;
        Ok(removed)
    }

    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        self.inner.stream()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}
