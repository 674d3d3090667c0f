//! Cascading revocation (single logout).
//!
//! [`CascadingRevocation::revoke`] removes a ticket and its whole descendant
//! closure, children before parents. Descendant ids that no longer resolve
//! (already swept or revoked) are skipped. Every service or proxy ticket is
//! handed to the [`SingleLogoutNotifier`] just before it is deleted, which is
//! where back-channel logout to the application hooks in.
//!
//! The walk uses an explicit stack and a visited set, so deep proxy chains
//! cannot overflow the call stack and a corrupt descendant graph with a
//! cycle still terminates.

use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::TicketResult,
    registry::TicketRegistry,
    ticket::{Ticket, TicketType},
};

/// Receives service and proxy tickets about to be revoked.
#[async_trait]
pub trait SingleLogoutNotifier: Send + Sync + fmt::Debug {
    /// Called once per revoked service or proxy ticket, before deletion.
    ///
    /// Delivery failures belong to the notifier; revocation continues.
    async fn notify(&self, ticket: &Ticket);
}

/// Notifier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSingleLogoutNotifier;

#[async_trait]
impl SingleLogoutNotifier for NoOpSingleLogoutNotifier {
    async fn notify(&self, _ticket: &Ticket) {}
}

enum Step {
    Enter(String),
    Remove(Ticket),
}

/// Tears down ticket subtrees through a [`TicketRegistry`].
#[derive(Clone)]
pub struct CascadingRevocation {
    registry: Arc<dyn TicketRegistry>,
    notifier: Arc<dyn SingleLogoutNotifier>,
}

impl fmt::Debug for CascadingRevocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadingRevocation").field("notifier", &self.notifier).finish_non_exhaustive()
    }
}

impl CascadingRevocation {
    /// Revocation without logout notifications.
    pub fn new(registry: Arc<dyn TicketRegistry>) -> Self {
        Self::with_notifier(registry, Arc::new(NoOpSingleLogoutNotifier))
    }

    /// Revocation that reports revoked service tickets to `notifier`.
    pub fn with_notifier(
        registry: Arc<dyn TicketRegistry>,
        notifier: Arc<dyn SingleLogoutNotifier>,
    ) -> Self {
        Self { registry, notifier }
    }

    /// Removes `id` and everything below it.
    ///
    /// Returns the number of tickets deleted; revoking an absent id returns 0.
    /// Expired tickets are still resolved so their subtrees are not orphaned.
    ///
    /// # Errors
    ///
    /// Registry failures abort the walk; tickets already deleted stay deleted
    /// and a repeated call finishes the job.
    #[tracing::instrument(skip(self), fields(removed))]
    pub async fn revoke(&self, id: &str) -> TicketResult<u64> {
        let mut removed = 0u64;
        let mut visited = HashSet::new();
        let mut stack = vec![Step::Enter(id.to_string())];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(current) => {
                    if !visited.insert(current.clone()) {
                        continue;
                    }
                    let Some(ticket) = self.registry.load(&current).await? else {
                        tracing::debug!(ticket_id = %current, "descendant already gone, skipping");
                        continue;
                    };
                    let children: Vec<String> =
                        ticket.descendant_ticket_ids().iter().rev().cloned().collect();
                    stack.push(Step::Remove(ticket));
                    stack.extend(children.into_iter().map(Step::Enter));
                },
                Step::Remove(ticket) => {
                    if matches!(ticket.ticket_type(), TicketType::Service | TicketType::Proxy) {
                        self.notifier.notify(&ticket).await;
                    }
                    removed += self.registry.delete(ticket.id()).await?;
                },
            }
        }

        tracing::Span::current().record("removed", removed);
        tracing::debug!(ticket_id = id, removed, "revocation complete");
        Ok(removed)
    }
}
