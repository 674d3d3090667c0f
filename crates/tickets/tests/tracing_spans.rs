//! Integration test verifying that `#[instrument]` annotations produce the
//! expected spans on registry, factory and revocation operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use tessera_tickets::{
    CascadingRevocation, MemoryTicketRegistry, TicketRegistry,
    testutil::{authentication, test_catalog, test_factory, test_registry_with_clock, test_service},
};
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// Collecting layer: records span names as they are created, plus values
// recorded later through `Span::record`.

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
    recorded: Arc<Mutex<Vec<(String, u64)>>>,
}

struct U64Visitor<'a>(&'a mut Vec<(String, u64)>);

impl Visit for U64Visitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.push((field.name().to_owned(), value));
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }

    fn on_record(
        &self,
        _id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut recorded = self.recorded.lock().expect("lock poisoned");
        values.record(&mut U64Visitor(&mut recorded));
    }
}

fn collect() -> (SpanCollector, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (collector, guard)
}

fn assert_span(collector: &SpanCollector, name: &str) {
    let recorded = collector.spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

#[tokio::test]
async fn registry_add_creates_span() {
    let (collector, _guard) = collect();

    let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let tgt = tessera_tickets::testutil::ticket_granting_ticket_fixture("TGT-1-span", "casuser");
    registry.add(tgt).await.expect("add should succeed");

    assert_span(&collector, "add");
}

#[tokio::test]
async fn registry_get_creates_span() {
    let (collector, _guard) = collect();

    let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let _ = registry.get("TGT-1-missing").await;

    assert_span(&collector, "get");
}

#[tokio::test]
async fn registry_delete_creates_span() {
    let (collector, _guard) = collect();

    let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    registry.delete("ST-1-missing").await.expect("delete should succeed");

    assert_span(&collector, "delete");
}

#[tokio::test]
async fn factory_operations_create_spans() {
    let (collector, _guard) = collect();

    let (registry, clock) = test_registry_with_clock();
    let registry: Arc<dyn TicketRegistry> = Arc::new(registry);
    let factory = test_factory(registry, clock);
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("login should succeed");
    factory
        .create_service_ticket(tgt.id(), test_service(), false)
        .await
        .expect("service ticket should be granted");

    assert_span(&collector, "create_ticket_granting_ticket");
    assert_span(&collector, "create_service_ticket");
    assert_span(&collector, "add_child");
}

#[tokio::test]
async fn revoke_records_removed_count() {
    let (collector, _guard) = collect();

    let (registry, clock) = test_registry_with_clock();
    let registry: Arc<dyn TicketRegistry> = Arc::new(registry);
    let factory = test_factory(registry.clone(), clock);
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("login should succeed");
    factory
        .create_service_ticket(tgt.id(), test_service(), false)
        .await
        .expect("service ticket should be granted");
    CascadingRevocation::new(registry).revoke(tgt.id()).await.expect("revoke should succeed");

    assert_span(&collector, "revoke");
    let recorded = collector.recorded.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|(name, value)| name == "removed" && *value == 2),
        "expected removed=2 to be recorded, got: {recorded:?}"
    );
}
