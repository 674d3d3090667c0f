//! Reconciliation sweep.
//!
//! Replication is best effort: a lagging subscriber or a failed publish
//! leaves the local view behind. [`Reconciler`] repairs it by comparing the
//! local registry against an authoritative one:
//!
//! - tickets missing from the authority are deleted locally,
//! - tickets the authority holds more of are merged in,
//! - tickets the local view never received are restored.
//!
//! The local snapshot is taken before the authority's, so a ticket written
//! through to the authority while the pass runs is never seen as missing
//! from it. Deletions are further limited to tickets untouched for the
//! grace period and still absent from the authority on a second look.
//!
//! Repairs go straight to the local registry and are never published.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tessera_tickets::{Ticket, TicketRegistry, TicketResult};
use tokio::{select, time::interval};

use crate::task::TaskHandle;

/// How long a local ticket is safe from removal after its last write.
pub const DEFAULT_RECONCILE_GRACE: Duration = Duration::from_secs(30);

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Local tickets the authority no longer holds.
    pub removed: u64,
    /// Local tickets that took in state only the authority had.
    pub refreshed: u64,
    /// Authoritative tickets added to the local view.
    pub restored: u64,
}

impl ReconcileReport {
    /// Whether the pass changed anything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Brings a local registry in line with an authoritative one.
#[derive(Clone)]
pub struct Reconciler {
    local: Arc<dyn TicketRegistry>,
    authority: Arc<dyn TicketRegistry>,
    grace: Duration,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler").field("grace", &self.grace).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler. `local` must be the undecorated local registry.
    pub fn new(local: Arc<dyn TicketRegistry>, authority: Arc<dyn TicketRegistry>) -> Self {
        Self { local, authority, grace: DEFAULT_RECONCILE_GRACE }
    }

    /// Sets how recently written local tickets are protected from removal.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether `ticket` was created or used after `cutoff`; `None` means
    /// the grace reaches back past the start of time.
    fn recently_written(ticket: &Ticket, cutoff: Option<DateTime<Utc>>) -> bool {
        let touched = ticket.creation_time().max(ticket.last_time_used());
        cutoff.is_none_or(|cutoff| touched > cutoff)
    }

    /// Runs one pass.
    ///
    /// # Errors
    ///
    /// Propagates registry failures of either side. Repairs made before the
    /// failure are kept.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> TicketResult<ReconcileReport> {
        let cutoff = chrono::Duration::from_std(self.grace)
            .ok()
            .and_then(|grace| self.local.now().checked_sub_signed(grace));

        let local: Vec<Ticket> = self.local.stream().try_collect().await?;
        let mut authoritative: HashMap<String, Ticket> = self
            .authority
            .stream()
            .map_ok(|ticket| (ticket.id().to_string(), ticket))
            .try_collect()
            .await?;

        let mut report = ReconcileReport::default();
        for ticket in local {
            match authoritative.remove(ticket.id()) {
                None if Self::recently_written(&ticket, cutoff) => {
                    tracing::trace!(ticket_id = ticket.id(), "inside grace period, kept");
                },
                None => {
                    if self.authority.load(ticket.id()).await?.is_none() {
                        report.removed += self.local.delete(ticket.id()).await?;
                    }
                },
                Some(current) => {
                    if self.local.merge(current).await?.is_some() {
                        report.refreshed += 1;
                    }
                },
            }
        }
        for id in authoritative.into_keys() {
            // Deleted through another node since the snapshot.
            let Some(current) = self.authority.load(&id).await? else {
                continue;
            };
            if self.local.merge(current).await?.is_some() {
                report.restored += 1;
            }
        }

        if report.is_clean() {
            tracing::debug!("local registry in sync");
        } else {
            tracing::info!(
                removed = report.removed,
                refreshed = report.refreshed,
                restored = report.restored,
                "reconciled local registry",
            );
        }
        Ok(report)
    }

    /// Runs a pass every `period` until the handle is dropped.
    ///
    /// The first pass runs after one full period. Failed passes are logged.
    #[must_use = "dropping the handle stops reconciliation"]
    pub fn spawn(self, period: Duration) -> TaskHandle {
        TaskHandle::spawn("reconciler", move |mut shutdown_rx| async move {
            let mut ticks = interval(period);
            ticks.tick().await;
            loop {
                select! {
                    _ = ticks.tick() => {
                        if let Err(err) = self.reconcile().await {
                            tracing::warn!(error = %err, "reconciliation pass failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tessera_tickets::{
        MemoryTicketRegistry,
        testutil::{
            service_ticket_fixture, test_catalog, ticket_granting_ticket_fixture,
            ticket_granting_ticket_fixture_at,
        },
    };

    use super::*;

    fn registries() -> (MemoryTicketRegistry, MemoryTicketRegistry, Reconciler) {
        let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
        let authority = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
        let reconciler = Reconciler::new(Arc::new(local.clone()), Arc::new(authority.clone()));
        (local, authority, reconciler)
    }

    #[tokio::test]
    async fn repairs_every_kind_of_drift() {
        let (local, authority, reconciler) = registries();

        // Gone from the authority.
        local.put(service_ticket_fixture("ST-1-gone", "TGT-1-abc")).await.unwrap();
        // Upstream holds a child this node never heard of.
        let mut old = ticket_granting_ticket_fixture("TGT-1-abc", "casuser");
        old.set_revision(1);
        local.put(old.clone()).await.unwrap();
        old.add_descendant("ST-2-new");
        old.set_revision(3);
        authority.put(old).await.unwrap();
        // Never received.
        authority.put(service_ticket_fixture("ST-2-new", "TGT-1-abc")).await.unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport { removed: 1, refreshed: 1, restored: 1 });
        assert!(local.load("ST-1-gone").await.unwrap().is_none());
        let refreshed = local.load("TGT-1-abc").await.unwrap().unwrap();
        assert_eq!(refreshed.revision(), 3);
        assert!(refreshed.descendant_ticket_ids().contains("ST-2-new"));
        assert!(local.load("ST-2-new").await.unwrap().is_some());

        assert!(reconciler.reconcile().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn newer_local_copy_is_kept() {
        let (local, authority, reconciler) = registries();
        let mut ticket = ticket_granting_ticket_fixture("TGT-1-abc", "casuser");
        ticket.set_revision(2);
        authority.put(ticket.clone()).await.unwrap();
        ticket.set_revision(5);
        local.put(ticket).await.unwrap();

        assert!(reconciler.reconcile().await.unwrap().is_clean());
        assert_eq!(local.load("TGT-1-abc").await.unwrap().unwrap().revision(), 5);
    }

    #[tokio::test]
    async fn fresh_local_tickets_survive_inside_the_grace_period() {
        let (local, authority, reconciler) = registries();
        let fresh = ticket_granting_ticket_fixture_at("TGT-1-fresh", "casuser", local.now());
        local.add(fresh).await.unwrap();
        local.add(ticket_granting_ticket_fixture("TGT-2-old", "casuser")).await.unwrap();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(local.load("TGT-1-fresh").await.unwrap().is_some());
        assert!(local.load("TGT-2-old").await.unwrap().is_none());

        let strict = Reconciler::new(Arc::new(local.clone()), Arc::new(authority.clone()))
            .with_grace(Duration::ZERO);
        assert_eq!(strict.reconcile().await.unwrap().removed, 1);
        assert!(local.is_empty());
    }

    /// Authority whose snapshots come out empty, as if taken just before
    /// every write it holds.
    struct EmptySnapshot(MemoryTicketRegistry);

    #[async_trait::async_trait]
    impl TicketRegistry for EmptySnapshot {
        async fn add(&self, ticket: Ticket) -> TicketResult<Ticket> {
            self.0.add(ticket).await
        }

        async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
            self.0.get(id).await
        }

        async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
            self.0.load(id).await
        }

        async fn update(&self, ticket: Ticket) -> TicketResult<Ticket> {
            self.0.update(ticket).await
        }

        async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket> {
            self.0.compare_and_update(ticket).await
        }

        async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)> {
            self.0.add_child(child, parent).await
        }

        async fn put(&self, ticket: Ticket) -> TicketResult<()> {
            self.0.put(ticket).await
        }

        async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>> {
            self.0.merge(ticket).await
        }

        async fn delete(&self, id: &str) -> TicketResult<u64> {
            self.0.delete(id).await
        }

        async fn delete_all(&self) -> TicketResult<u64> {
            self.0.delete_all().await
        }

        fn stream(&self) -> futures::stream::BoxStream<'_, TicketResult<Ticket>> {
            Box::pin(futures::stream::empty())
        }
    }

    #[tokio::test]
    async fn removal_rechecks_the_authority() {
        let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
        let authority = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
        let ticket = ticket_granting_ticket_fixture("TGT-1-abc", "casuser");
        local.add(ticket.clone()).await.unwrap();
        authority.add(ticket).await.unwrap();

        let reconciler =
            Reconciler::new(Arc::new(local.clone()), Arc::new(EmptySnapshot(authority)))
                .with_grace(Duration::ZERO);
        assert!(reconciler.reconcile().await.unwrap().is_clean());
        assert!(local.load("TGT-1-abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn local_additions_never_lose_state_to_the_authority() {
        let (local, authority, reconciler) = registries();
        let mut ticket = ticket_granting_ticket_fixture("TGT-1-abc", "casuser");
        ticket.set_revision(2);
        authority.put(ticket.clone()).await.unwrap();
        ticket.add_descendant("ST-1-local");
        ticket.set_revision(2);
        local.put(ticket).await.unwrap();

        assert!(reconciler.reconcile().await.unwrap().is_clean());
        let kept = local.load("TGT-1-abc").await.unwrap().unwrap();
        assert!(kept.descendant_ticket_ids().contains("ST-1-local"));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_passes_run_until_shutdown() {
        let (local, authority, reconciler) = registries();
        let handle = reconciler.spawn(Duration::from_secs(60));

        authority.put(service_ticket_fixture("ST-1-abc", "TGT-1-abc")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(local.load("ST-1-abc").await.unwrap().is_some());

        handle.shutdown().await;
    }
}
