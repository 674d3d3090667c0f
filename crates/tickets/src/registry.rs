//! Ticket registry trait definition.
//!
//! [`TicketRegistry`] is the storage contract every backend satisfies:
//! in-memory, key/value caches, document stores or relational tables. It is
//! deliberately a storage engine: it never recurses into descendants
//! (that is [`CascadingRevocation`](crate::revocation::CascadingRevocation))
//! and never publishes replication commands (that is a decorator in
//! `tessera-replication`).
//!
//! # Operations
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`add`](TicketRegistry::add) | Store a new ticket; duplicate ids are rejected |
//! | [`get`](TicketRegistry::get) | Fetch a ticket, hiding expired ones |
//! | [`load`](TicketRegistry::load) | Fetch a ticket even when expired |
//! | [`update`](TicketRegistry::update) | Persist mutated fields unconditionally |
//! | [`compare_and_update`](TicketRegistry::compare_and_update) | Persist only if the revision is unchanged |
//! | [`add_child`](TicketRegistry::add_child) | Store a child and its updated parent atomically |
//! | [`put`](TicketRegistry::put) | Store a ticket verbatim |
//! | [`merge`](TicketRegistry::merge) | Fold a replicated copy into the stored one atomically |
//! | [`delete`](TicketRegistry::delete) | Remove one ticket |
//! | [`delete_all`](TicketRegistry::delete_all) | Remove every ticket |
//! | [`stream`](TicketRegistry::stream) | Lazily iterate every stored ticket |
//!
//! # Revisions
//!
//! Every stored ticket carries a revision starting at 1 and incremented by
//! each write. [`compare_and_update`](TicketRegistry::compare_and_update) and
//! [`add_child`](TicketRegistry::add_child) fail with
//! [`TicketError::Conflict`] when the caller's copy is stale, which gives a
//! per-ticket compare-and-swap discipline without locks.
//!
//! Higher-level queries (typed lookup, counts, chain traversal, consumption)
//! live in [`TicketRegistryExt`], which every registry gets for free.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{TryStreamExt, stream::BoxStream};

use crate::{
    error::{TicketError, TicketResult},
    ticket::{Authentication, Service, Ticket, TicketType},
};

/// Compare-and-update attempts used by [`TicketRegistryExt::modify`].
pub const DEFAULT_MODIFY_ATTEMPTS: u32 = 16;

/// Abstract ticket storage.
///
/// Implementations must be safe for concurrent use by request handlers, the
/// cleaner and the replication receiver at the same time. Writes made on one
/// node must be visible to a following `get` on that node.
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Stores a new ticket with revision 1 and returns the stored copy.
    ///
    /// # Errors
    ///
    /// [`TicketError::DuplicateTicket`] if the id is taken,
    /// [`TicketError::UnknownTicketType`] if the prefix is not registered.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn add(&self, ticket: Ticket) -> TicketResult<Ticket>;

    /// Returns the ticket if it is stored and not expired.
    ///
    /// Expired tickets are reported as absent even before they are purged.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>>;

    /// Returns the stored ticket regardless of expiration.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>>;

    /// Overwrites a stored ticket, bumping its revision.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the ticket is not stored.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn update(&self, ticket: Ticket) -> TicketResult<Ticket>;

    /// Overwrites a stored ticket only if its revision still matches.
    ///
    /// # Errors
    ///
    /// [`TicketError::Conflict`] if the stored revision differs or the ticket
    /// is gone.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket>;

    /// Stores `child` and the updated `parent` in one atomic step.
    ///
    /// The parent's revision is checked like
    /// [`compare_and_update`](Self::compare_and_update), so concurrent
    /// children added under the same parent never lose each other.
    ///
    /// # Errors
    ///
    /// [`TicketError::Conflict`] for a stale parent,
    /// [`TicketError::DuplicateTicket`] if the child id is taken.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)>;

    /// Stores a ticket exactly as given, revision included.
    ///
    /// Used to apply replicated state; repeated calls are idempotent.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn put(&self, ticket: Ticket) -> TicketResult<()>;

    /// Folds a copy of a ticket held elsewhere into the stored one.
    ///
    /// Read, join and write happen as one step, so a concurrent local
    /// consumption or child grant is never overwritten. The join is
    /// [`Ticket::absorb`]. An absent ticket is stored as given with revision
    /// at least 1. The result keeps the incoming revision when it equals the
    /// incoming copy and that copy is newer; otherwise it is one past the
    /// higher of the two, so revisions never go backwards.
    ///
    /// Returns the stored ticket if anything changed, `None` if the incoming
    /// copy added nothing. Repeated calls are idempotent.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>>;

    /// Removes one ticket without touching its descendants.
    ///
    /// Returns the number of tickets removed: 1, or 0 if absent.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn delete(&self, id: &str) -> TicketResult<u64>;

    /// Removes every ticket and returns how many were removed.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn delete_all(&self) -> TicketResult<u64>;

    /// Lazily yields every stored ticket, expired ones included.
    ///
    /// Each call starts a fresh, finite pass.
    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>>;

    /// Current instant as seen by this registry's expiration checks.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Queries and read-modify-write helpers built on [`TicketRegistry`].
#[async_trait]
pub trait TicketRegistryExt: TicketRegistry {
    /// Fetches a live ticket of the given type.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the ticket is absent, expired,
    /// or of another type.
    async fn get_typed(&self, id: &str, ticket_type: TicketType) -> TicketResult<Ticket> {
        let ticket = self
            .get(id)
            .await?
            .ok_or_else(|| TicketError::invalid_state(id, "ticket does not exist or has expired"))?;
        if ticket.ticket_type() != ticket_type {
            return Err(TicketError::invalid_state(
                id,
                format!("expected a {ticket_type} ticket, found {}", ticket.ticket_type()),
            ));
        }
        Ok(ticket)
    }

    /// Applies `mutate` to a live ticket under compare-and-swap, retrying on
    /// conflicts up to `max_attempts` times.
    ///
    /// `mutate` sees the freshest copy on each attempt and may reject it by
    /// returning an error, which ends the loop.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the ticket is absent or expired,
    /// errors from `mutate`, or the last [`TicketError::Conflict`].
    async fn modify_with_attempts<F>(
        &self,
        id: &str,
        max_attempts: u32,
        mut mutate: F,
    ) -> TicketResult<Ticket>
    where
        F: FnMut(&mut Ticket) -> TicketResult<()> + Send,
    {
        let mut last_conflict = None;
        for attempt in 0..max_attempts.max(1) {
            let mut ticket = self.get(id).await?.ok_or_else(|| {
                TicketError::invalid_state(id, "ticket does not exist or has expired")
            })?;
            mutate(&mut ticket)?;
            match self.compare_and_update(ticket).await {
                Ok(stored) => return Ok(stored),
                Err(err) if err.is_conflict() => {
                    tracing::debug!(ticket_id = id, attempt, "revision conflict, re-reading");
                    last_conflict = Some(err);
                },
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| TicketError::conflict(id, 0, 0)))
    }

    /// [`modify_with_attempts`](Self::modify_with_attempts) with
    /// [`DEFAULT_MODIFY_ATTEMPTS`].
    async fn modify<F>(&self, id: &str, mutate: F) -> TicketResult<Ticket>
    where
        F: FnMut(&mut Ticket) -> TicketResult<()> + Send,
    {
        self.modify_with_attempts(id, DEFAULT_MODIFY_ATTEMPTS, mutate).await
    }

    /// Validates and consumes a service or proxy ticket for `service`.
    ///
    /// At most one of any number of concurrent callers succeeds for a
    /// single-use ticket.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the ticket is absent, expired,
    /// already consumed, not a service/proxy ticket, or issued for another
    /// service.
    async fn consume_service_ticket(&self, id: &str, service: &Service) -> TicketResult<Ticket> {
        let now = self.now();
        self.modify(id, |ticket| {
            let Some(st) = ticket.as_service_ticket() else {
                return Err(TicketError::invalid_state(
                    ticket.id(),
                    format!("{} tickets cannot be validated", ticket.ticket_type()),
                ));
            };
            if !st.service.matches(service) {
                return Err(TicketError::invalid_state(
                    ticket.id(),
                    format!("issued for {}, presented by {}", st.service.id, service.id),
                ));
            }
            if !ticket.consume(now) {
                return Err(TicketError::invalid_state(ticket.id(), "ticket was already consumed"));
            }
            Ok(())
        })
        .await
    }

    /// Follows parent links from `id` to the root ticket-granting ticket.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if any link is missing or the chain
    /// loops.
    async fn root_of(&self, id: &str) -> TicketResult<Ticket> {
        let mut seen = HashSet::new();
        let mut current = self
            .get(id)
            .await?
            .ok_or_else(|| TicketError::invalid_state(id, "ticket does not exist or has expired"))?;
        loop {
            if !seen.insert(current.id().to_string()) {
                return Err(TicketError::invalid_state(id, "ticket chain contains a cycle"));
            }
            let Some(parent_id) = current.parent_id().map(str::to_string) else {
                return Ok(current);
            };
            current = self.get(&parent_id).await?.ok_or_else(|| {
                TicketError::invalid_state(parent_id.clone(), "parent ticket does not exist")
            })?;
        }
    }

    /// Authentications along the granting chain of `id`, nearest first.
    ///
    /// # Errors
    ///
    /// Same as [`root_of`](Self::root_of).
    async fn chained_authentications(&self, id: &str) -> TicketResult<Vec<Authentication>> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut next = Some(id.to_string());
        while let Some(current_id) = next {
            if !seen.insert(current_id.clone()) {
                return Err(TicketError::invalid_state(id, "ticket chain contains a cycle"));
            }
            let ticket = self.get(&current_id).await?.ok_or_else(|| {
                TicketError::invalid_state(current_id.clone(), "ticket does not exist or has expired")
            })?;
            if let Some(authentication) = ticket.authentication() {
                chain.push(authentication.clone());
            }
            next = ticket.parent_id().map(str::to_string);
        }
        Ok(chain)
    }

    /// Live tickets matching `predicate`.
    async fn live_tickets<P>(&self, mut predicate: P) -> TicketResult<Vec<Ticket>>
    where
        P: FnMut(&Ticket) -> bool + Send,
    {
        let now = self.now();
        self.stream()
            .try_filter(|ticket| {
                let keep = !ticket.is_expired(now) && predicate(ticket);
                futures::future::ready(keep)
            })
            .try_collect()
            .await
    }

    /// Number of live ticket-granting tickets.
    async fn session_count(&self) -> TicketResult<u64> {
        let sessions =
            self.live_tickets(|t| t.ticket_type() == TicketType::TicketGranting).await?;
        Ok(sessions.len() as u64)
    }

    /// Number of live service and proxy tickets.
    async fn service_ticket_count(&self) -> TicketResult<u64> {
        let tickets = self
            .live_tickets(|t| matches!(t.ticket_type(), TicketType::Service | TicketType::Proxy))
            .await?;
        Ok(tickets.len() as u64)
    }

    /// Live ticket-granting tickets of a principal.
    async fn sessions_for(&self, principal_id: &str) -> TicketResult<Vec<Ticket>> {
        self.live_tickets(|t| {
            t.ticket_type() == TicketType::TicketGranting && t.principal_id() == Some(principal_id)
        })
        .await
    }

    /// Number of live ticket-granting tickets of a principal.
    async fn count_sessions_for(&self, principal_id: &str) -> TicketResult<u64> {
        Ok(self.sessions_for(principal_id).await?.len() as u64)
    }

    /// Number of live tickets bound to a service.
    async fn count_tickets_for(&self, service_id: &str) -> TicketResult<u64> {
        let tickets = self.live_tickets(|t| t.service().is_some_and(|s| s.id == service_id)).await?;
        Ok(tickets.len() as u64)
    }
}

impl<R: TicketRegistry + ?Sized> TicketRegistryExt for R {}

#[async_trait]
impl<R: TicketRegistry + ?Sized> TicketRegistry for std::sync::Arc<R> {
    async fn add(&self, ticket: Ticket) -> TicketResult<Ticket> {
        (**self).add(ticket).await
    }

    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        (**self).get(id).await
    }

    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
        (**self).load(id).await
    }

    async fn update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        (**self).update(ticket).await
    }

    async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        (**self).compare_and_update(ticket).await
    }

    async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)> {
        (**self).add_child(child, parent).await
    }

    async fn put(&self, ticket: Ticket) -> TicketResult<()> {
        (**self).put(ticket).await
    }

    async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>> {
        (**self).merge(ticket).await
    }

    async fn delete(&self, id: &str) -> TicketResult<u64> {
        (**self).delete(id).await
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        (**self).delete_all().await
    }

    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        (**self).stream()
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
