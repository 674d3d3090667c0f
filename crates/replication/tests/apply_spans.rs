//! The receiver opens an `apply_command` span carrying the command's
//! identity, and the reconciler instruments each pass.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use tessera_replication::{
    ApplyOutcome, CommandReceiver, PublisherIdentifier, ReplicationCommand, ReplicationConfig,
    Reconciler,
};
use tessera_tickets::{
    JsonTicketCodec, MemoryTicketRegistry,
    testutil::{test_catalog, ticket_granting_ticket_fixture},
};
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

impl Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_owned(), format!("{value:?}")));
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = Vec::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        self.spans.lock().expect("lock poisoned").push((attrs.metadata().name().to_owned(), fields));
    }
}

fn collect() -> (SpanCollector, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (collector, guard)
}

fn field(collector: &SpanCollector, span: &str, name: &str) -> Option<String> {
    let spans = collector.spans.lock().expect("lock poisoned");
    spans
        .iter()
        .filter(|(n, _)| n == span)
        .flat_map(|(_, fields)| fields.iter())
        .find(|(f, _)| f == name)
        .map(|(_, v)| v.clone())
}

#[tokio::test]
async fn apply_records_command_identity() {
    let (collector, _guard) = collect();

    let codec = Arc::new(JsonTicketCodec::with_catalog(test_catalog()));
    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let receiver = CommandReceiver::new(
        PublisherIdentifier::new("node-b"),
        Arc::new(local),
        codec.clone(),
        &ReplicationConfig::default(),
    );

    let peer = PublisherIdentifier::new("node-a");
    let ticket = ticket_granting_ticket_fixture("TGT-1-span", "casuser");
    let command = ReplicationCommand::add(&peer, &ticket, codec.as_ref()).expect("encode");
    let outcome = receiver.apply(&command).await.expect("apply");
    assert_eq!(outcome, ApplyOutcome::Applied);

    assert_eq!(field(&collector, "apply_command", "origin_id").as_deref(), Some("node-a"));
    assert_eq!(field(&collector, "apply_command", "message_type").as_deref(), Some("ADD"));
    assert_eq!(
        field(&collector, "apply_command", "command_id"),
        Some(command.command_id.to_string()),
    );
}

#[tokio::test]
async fn reconcile_pass_creates_span() {
    let (collector, _guard) = collect();

    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let authority = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let report = Reconciler::new(Arc::new(local), Arc::new(authority))
        .reconcile()
        .await
        .expect("reconcile");
    assert!(report.is_clean());

    let spans = collector.spans.lock().expect("lock poisoned");
    assert!(spans.iter().any(|(name, _)| name == "reconcile"), "got: {spans:?}");
}
