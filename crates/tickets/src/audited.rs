//! Audit-logging decorator for [`TicketRegistry`] implementations.
//!
//! Wraps any registry to emit an [`AuditEvent`] for every write, without
//! changing the wrapped registry. Reads pass through unaudited.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult},
    error::TicketResult,
    registry::TicketRegistry,
    ticket::Ticket,
};

/// Resource name used for registry-wide operations.
const ALL_TICKETS: &str = "*";

/// Decorator that audits every write of a [`TicketRegistry`].
///
/// ```
/// use tessera_tickets::{
///     MemoryTicketRegistry, TicketCatalog, TicketRegistryConfig,
///     audit::TracingAuditLogger, audited::AuditedTicketRegistry,
/// };
///
/// let catalog = TicketCatalog::from_config(&TicketRegistryConfig::default()).unwrap();
/// let registry = MemoryTicketRegistry::builder().catalog(catalog).build();
/// let audited = AuditedTicketRegistry::new(registry, TracingAuditLogger, "node-a");
/// ```
#[derive(Debug, Clone)]
pub struct AuditedTicketRegistry<R, L> {
    inner: R,
    logger: L,
    actor: Arc<str>,
}

impl<R, L> AuditedTicketRegistry<R, L>
where
    R: TicketRegistry,
    L: AuditLogger,
{
    /// Wraps `inner`, attributing events to `actor`.
    pub fn new(inner: R, logger: L, actor: impl Into<Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn emit(
        &self,
        action: AuditAction,
        resource: &str,
        result: AuditResult,
        metadata: BTreeMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.logger.log(&event).await;
    }

    fn result_from<T>(res: &TicketResult<T>) -> AuditResult {
        match res {
            Ok(_) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        }
    }

    fn describe(ticket: &Ticket) -> BTreeMap<String, String> {
        BTreeMap::from([("ticket_type".to_owned(), ticket.ticket_type().to_string())])
    }

    fn with_revision(
        mut metadata: BTreeMap<String, String>,
        res: &TicketResult<Ticket>,
    ) -> BTreeMap<String, String> {
        if let Ok(stored) = res {
            metadata.insert("revision".to_owned(), stored.revision().to_string());
        }
        metadata
    }
}

#[async_trait]
impl<R, L> TicketRegistry for AuditedTicketRegistry<R, L>
where
    R: TicketRegistry,
    L: AuditLogger,
{
    async fn add(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let id = ticket.id().to_string();
        let metadata = Self::describe(&ticket);
        let res = self.inner.add(ticket).await;
        let metadata = Self::with_revision(metadata, &res);
        self.emit(AuditAction::AddTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        self.inner.get(id).await
    }

    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
        self.inner.load(id).await
    }

    async fn update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let id = ticket.id().to_string();
        let metadata = Self::describe(&ticket);
        let res = self.inner.update(ticket).await;
        let metadata = Self::with_revision(metadata, &res);
        self.emit(AuditAction::UpdateTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let id = ticket.id().to_string();
        let mut metadata = Self::describe(&ticket);
        metadata.insert("expected_revision".to_owned(), ticket.revision().to_string());
        let res = self.inner.compare_and_update(ticket).await;
        let metadata = Self::with_revision(metadata, &res);
        self.emit(AuditAction::UpdateTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)> {
        let id = child.id().to_string();
        let mut metadata = Self::describe(&child);
        metadata.insert("parent_id".to_owned(), parent.id().to_string());
        let res = self.inner.add_child(child, parent).await;
        self.emit(AuditAction::AddChildTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn put(&self, ticket: Ticket) -> TicketResult<()> {
        let id = ticket.id().to_string();
        let mut metadata = Self::describe(&ticket);
        metadata.insert("revision".to_owned(), ticket.revision().to_string());
        let res = self.inner.put(ticket).await;
        self.emit(AuditAction::PutTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>> {
        let id = ticket.id().to_string();
        let mut metadata = Self::describe(&ticket);
        metadata.insert("incoming_revision".to_owned(), ticket.revision().to_string());
        let res = self.inner.merge(ticket).await;
        if let Ok(merged) = &res {
            metadata.insert("changed".to_owned(), merged.is_some().to_string());
            if let Some(stored) = merged {
                metadata.insert("revision".to_owned(), stored.revision().to_string());
            }
        }
        self.emit(AuditAction::MergeTicket, &id, Self::result_from(&res), metadata).await;
        res
    }

    async fn delete(&self, id: &str) -> TicketResult<u64> {
        let res = self.inner.delete(id).await;
        let mut metadata = BTreeMap::new();
        if let Ok(removed) = &res {
            metadata.insert("removed".to_owned(), removed.to_string());
        }
        self.emit(AuditAction::DeleteTicket, id, Self::result_from(&res), metadata).await;
        res
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        let res = self.inner.delete_all().await;
        let mut metadata = BTreeMap::new();
        if let Ok(removed) = &res {
            metadata.insert("removed".to_owned(), removed.to_string());
        }
        self.emit(AuditAction::DeleteAllTickets, ALL_TICKETS, Self::result_from(&res), metadata)
            .await;
        res
    }

    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        self.inner.stream()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        assert_duplicate,
        memory::MemoryTicketRegistry,
        testutil::{service_ticket_fixture, test_registry_with_clock, ticket_granting_ticket_fixture},
    };

    type Audited = AuditedTicketRegistry<MemoryTicketRegistry, Arc<Recorder>>;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AuditEvent>>);

    #[async_trait]
    impl AuditLogger for Recorder {
        async fn log(&self, event: &AuditEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn audited() -> (Audited, Arc<Recorder>) {
        let (registry, _) = test_registry_with_clock();
        let recorder = Arc::new(Recorder::default());
        (AuditedTicketRegistry::new(registry, Arc::clone(&recorder), "node-a"), recorder)
    }

    #[tokio::test]
    async fn writes_are_audited() {
        let (registry, recorder) = audited();
        let tgt = registry.add(ticket_granting_ticket_fixture("TGT-1-a", "casuser")).await.unwrap();
        registry.update(tgt).await.unwrap();
        assert_eq!(registry.delete("TGT-1-a").await.unwrap(), 1);

        let events = recorder.0.lock().clone();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [AuditAction::AddTicket, AuditAction::UpdateTicket, AuditAction::DeleteTicket]
        );
        assert!(events.iter().all(|e| e.actor == "node-a" && e.resource == "TGT-1-a"));
        assert_eq!(events[0].metadata.get("revision").map(String::as_str), Some("1"));
        assert_eq!(events[1].metadata.get("revision").map(String::as_str), Some("2"));
        assert_eq!(events[2].metadata.get("removed").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn merges_record_whether_anything_changed() {
        let (registry, recorder) = audited();
        let mut copy = ticket_granting_ticket_fixture("TGT-1-a", "casuser");
        copy.set_revision(4);
        registry.merge(copy.clone()).await.unwrap();
        registry.merge(copy).await.unwrap();

        let events = recorder.0.lock().clone();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.action == AuditAction::MergeTicket));
        assert_eq!(events[0].metadata.get("changed").map(String::as_str), Some("true"));
        assert_eq!(events[0].metadata.get("revision").map(String::as_str), Some("4"));
        assert_eq!(events[1].metadata.get("changed").map(String::as_str), Some("false"));
        assert_eq!(AuditAction::MergeTicket.to_string(), "merge_ticket");
    }

    #[tokio::test]
    async fn reads_are_not_audited() {
        let (registry, recorder) = audited();
        registry.get("TGT-1-a").await.unwrap();
        registry.load("TGT-1-a").await.unwrap();
        assert!(recorder.0.lock().is_empty());
    }

    #[tokio::test]
    async fn failures_are_audited() {
        let (registry, recorder) = audited();
        registry.add(service_ticket_fixture("ST-1-a", "TGT-1-a")).await.unwrap();
        assert_duplicate!(registry.add(service_ticket_fixture("ST-1-a", "TGT-1-a")).await);

        let events = recorder.0.lock().clone();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1].result,
            AuditResult::Failure(reason) if reason.contains("ST-1-a")
        ));
    }

    #[tokio::test]
    async fn delete_all_uses_wildcard_resource() {
        let (registry, recorder) = audited();
        registry.add(service_ticket_fixture("ST-1-a", "TGT-1-a")).await.unwrap();
        assert_eq!(registry.delete_all().await.unwrap(), 1);
        let events = recorder.0.lock().clone();
        let last = events.last().unwrap();
        assert_eq!(last.action, AuditAction::DeleteAllTickets);
        assert_eq!(last.resource, "*");
    }
}
