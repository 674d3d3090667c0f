//! Multi-node replication over a shared in-process bus.
#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tessera_cipher::{CipherTicketCodec, testutil::catalog_with_crypto};
use tessera_replication::{
    ApplyOutcome, CommandReceiver, CommandTransport, InProcessTransport, PublisherIdentifier,
    ReplicationCommand, ReplicationConfig, ReplicationNode,
    testutil::{TestCluster, eventually},
};
use tessera_tickets::{
    CascadingRevocation, CipherStrategy, DefaultTicketFactory, JsonTicketCodec,
    MemoryTicketRegistry, TicketCodec, TicketRegistry, TicketRegistryConfig, TicketRegistryExt,
    audit::{AuditAction, AuditEvent, AuditLogger},
    audited::AuditedTicketRegistry,
    clock::SystemClock,
    testutil::{authentication, test_catalog, ticket_granting_ticket_fixture_at},
    ticket::Service,
};

fn factory(registry: Arc<dyn TicketRegistry>) -> DefaultTicketFactory {
    DefaultTicketFactory::from_config(
        &TicketRegistryConfig::default(),
        registry,
        Arc::new(SystemClock),
    )
    .expect("factory")
}

fn login() -> tessera_tickets::ticket::Authentication {
    let mut authentication = authentication("casuser");
    authentication.authentication_date = Utc::now();
    authentication
}

async fn present(registry: &MemoryTicketRegistry, id: &str) -> bool {
    registry.load(id).await.expect("load").is_some()
}

#[tokio::test]
async fn tickets_created_on_one_node_appear_on_the_others() {
    let cluster = TestCluster::start(3);
    let factory = factory(cluster.registry(0));

    let tgt = factory.create_ticket_granting_ticket(login()).await.expect("login");
    let service = Service::new("https://app.example.org");
    let st = factory.create_service_ticket(tgt.id(), service, false).await.expect("st");

    for local in &cluster.locals[1..] {
        eventually("service ticket replicated", || present(local, st.id())).await;
        let parent = local.load(tgt.id()).await.expect("load").expect("tgt replicated");
        eventually("parent update replicated", || async {
            local
                .load(tgt.id())
                .await
                .expect("load")
                .is_some_and(|t| t.descendant_ticket_ids().contains(st.id()))
        })
        .await;
        assert_eq!(parent.id(), tgt.id());
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn single_logout_on_one_node_clears_every_node() {
    let cluster = TestCluster::start(2);
    let factory = factory(cluster.registry(0));
    let tgt = factory.create_ticket_granting_ticket(login()).await.expect("login");
    let service = Service::new("https://app.example.org");
    let st = factory.create_service_ticket(tgt.id(), service, false).await.expect("st");
    let peer = &cluster.locals[1];
    eventually("session replicated", || present(peer, st.id())).await;

    let removed = CascadingRevocation::new(cluster.registry(0)).revoke(tgt.id()).await;
    assert_eq!(removed.expect("revoke"), 2);

    eventually("logout replicated", || async {
        !present(peer, tgt.id()).await && !present(peer, st.id()).await
    })
    .await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn consumption_replicates_as_an_update() {
    let cluster = TestCluster::start(2);
    let factory = factory(cluster.registry(0));
    let tgt = factory.create_ticket_granting_ticket(login()).await.expect("login");
    let service = Service::new("https://app.example.org");
    let st = factory.create_service_ticket(tgt.id(), service.clone(), false).await.expect("st");

    cluster.registry(0).consume_service_ticket(st.id(), &service).await.expect("validate");

    let peer = &cluster.locals[1];
    eventually("consumed state replicated", || async {
        peer.load(st.id()).await.expect("load").is_some_and(|t| t.is_consumed())
    })
    .await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn delete_all_replicates() {
    let cluster = TestCluster::start(2);
    let factory = factory(cluster.registry(1));
    factory.create_ticket_granting_ticket(login()).await.expect("login");
    eventually("ticket replicated", || async { !cluster.locals[0].is_empty() }).await;

    cluster.registry(1).delete_all().await.expect("delete all");
    eventually("delete-all replicated", || async { cluster.locals[0].is_empty() }).await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn protected_payloads_replicate_between_nodes_sharing_keys() {
    let catalog = catalog_with_crypto(&["TGT", "ST"], CipherStrategy::EncryptThenSign);
    let codec: Arc<dyn TicketCodec> = Arc::new(CipherTicketCodec::new(catalog).expect("codec"));
    let cluster = TestCluster::start_with_codec(2, codec);

    let tgt = ticket_granting_ticket_fixture_at("TGT-1-enc", "casuser", Utc::now());
    cluster.registry(0).add(tgt).await.expect("add");
    eventually("protected ticket replicated", || present(&cluster.locals[1], "TGT-1-enc")).await;
    cluster.shutdown().await;
}

// ---------------------------------------------------------------------------
// Loop prevention and redelivery, observed through an audited local registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder(Mutex<Vec<AuditEvent>>);

#[async_trait]
impl AuditLogger for Recorder {
    async fn log(&self, event: &AuditEvent) {
        self.0.lock().push(event.clone());
    }
}

impl Recorder {
    fn writes(&self) -> usize {
        self.0.lock().iter().filter(|e| !matches!(e.action, AuditAction::DeleteAllTickets)).count()
    }
}

struct AuditedNode {
    node: ReplicationNode,
    recorder: Arc<Recorder>,
}

fn audited_node(bus: &InProcessTransport, name: &str) -> AuditedNode {
    let recorder = Arc::new(Recorder::default());
    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let audited = AuditedTicketRegistry::new(local, Arc::clone(&recorder), name);
    let node = ReplicationNode::builder()
        .config(ReplicationConfig::builder().publisher_id(name.to_string()).build())
        .local(Arc::new(audited))
        .transport(Arc::new(bus.clone()))
        .codec(Arc::new(JsonTicketCodec::with_catalog(test_catalog())))
        .build()
        .expect("node starts");
    AuditedNode { node, recorder }
}

#[tokio::test]
async fn own_echo_is_not_reapplied_and_redelivery_applies_once() {
    let bus = InProcessTransport::new("tickets", 64);
    let a = audited_node(&bus, "node-a");
    let b = audited_node(&bus, "node-b");

    // Capture A's command as it goes over the wire.
    let mut tap = bus.subscribe();
    let tgt = ticket_granting_ticket_fixture_at("TGT-1-loop", "casuser", Utc::now());
    a.node.registry().add(tgt).await.expect("add");
    let frame = futures::StreamExt::next(&mut tap).await.expect("frame").expect("frame");
    let command = ReplicationCommand::from_wire(&frame).expect("command");
    assert_eq!(command.origin_id.as_str(), "node-a");

    eventually("B applied the add", || async { b.recorder.writes() == 1 }).await;

    // Redeliver the same command twice, then send a marker from A. B's
    // subscription is FIFO, so once the marker lands the redeliveries have
    // been processed.
    bus.publish(frame.clone()).await.expect("redeliver");
    bus.publish(frame).await.expect("redeliver");
    let marker = ticket_granting_ticket_fixture_at("TGT-2-mark", "casuser", Utc::now());
    a.node.registry().add(marker).await.expect("marker");
    eventually("B applied the marker", || async {
        b.node.local().load("TGT-2-mark").await.expect("load").is_some()
    })
    .await;

    // A: its own two adds; its echoes never reached the registry.
    assert_eq!(a.recorder.writes(), 2);
    // B: A's add exactly once plus the marker.
    assert_eq!(b.recorder.writes(), 2);

    a.node.shutdown().await;
    b.node.shutdown().await;
}

#[tokio::test]
async fn node_reconciles_against_an_authority() {
    let bus = InProcessTransport::new("tickets", 64);
    let authority = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let node = ReplicationNode::builder()
        .config(
            ReplicationConfig::builder()
                .reconcile_interval(std::time::Duration::from_millis(20))
                .build(),
        )
        .local(Arc::new(local.clone()))
        .transport(Arc::new(bus))
        .codec(Arc::new(JsonTicketCodec::with_catalog(test_catalog())))
        .authority(Arc::new(authority.clone()))
        .build()
        .expect("node starts");

    let tgt = ticket_granting_ticket_fixture_at("TGT-1-auth", "casuser", Utc::now());
    authority.add(tgt).await.expect("add");
    eventually("missed ticket restored", || present(&local, "TGT-1-auth")).await;

    node.shutdown().await;
}

#[tokio::test]
async fn node_created_tickets_survive_reconciliation() {
    let bus = InProcessTransport::new("tickets", 64);
    let authority = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let node = ReplicationNode::builder()
        .config(
            ReplicationConfig::builder()
                .reconcile_interval(std::time::Duration::from_millis(20))
                .build(),
        )
        .local(Arc::new(local.clone()))
        .transport(Arc::new(bus))
        .codec(Arc::new(JsonTicketCodec::with_catalog(test_catalog())))
        .authority(Arc::new(authority.clone()))
        .build()
        .expect("node starts");

    let tgt = ticket_granting_ticket_fixture_at("TGT-1-node", "casuser", Utc::now());
    node.registry().add(tgt).await.expect("add");
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert!(present(&local, "TGT-1-node").await, "reconciler removed a live local ticket");
    assert!(present(&authority, "TGT-1-node").await, "write never reached the authority");

    node.registry().delete("TGT-1-node").await.expect("delete");
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert!(!present(&local, "TGT-1-node").await, "reconciler restored a deleted ticket");
    node.shutdown().await;
}

// ---------------------------------------------------------------------------
// Concurrent grants on two nodes
// ---------------------------------------------------------------------------

struct Peer {
    local: MemoryTicketRegistry,
    receiver: CommandReceiver,
    origin: PublisherIdentifier,
}

fn peer(name: &str) -> Peer {
    let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let origin = PublisherIdentifier::new(name);
    let receiver = CommandReceiver::new(
        origin.clone(),
        Arc::new(local.clone()),
        Arc::new(JsonTicketCodec::with_catalog(test_catalog())),
        &ReplicationConfig::default(),
    );
    Peer { local, receiver, origin }
}

/// Commands node `from` would have published for a child grant.
fn grant_commands(
    from: &Peer,
    child: &tessera_tickets::Ticket,
    parent: &tessera_tickets::Ticket,
    codec: &JsonTicketCodec,
) -> [ReplicationCommand; 2] {
    [
        ReplicationCommand::add(&from.origin, child, codec).expect("encode child"),
        ReplicationCommand::update(&from.origin, parent, codec).expect("encode parent"),
    ]
}

#[tokio::test]
async fn concurrent_grants_on_two_nodes_converge() {
    let codec = JsonTicketCodec::with_catalog(test_catalog());
    let (a, b) = (peer("node-a"), peer("node-b"));
    let tgt = ticket_granting_ticket_fixture_at("TGT-1-shared", "casuser", Utc::now());
    a.local.add(tgt.clone()).await.expect("add on A");
    b.local.add(tgt).await.expect("add on B");

    // Both nodes grant a service ticket before hearing from each other.
    let st_a = factory(Arc::new(a.local.clone()))
        .create_service_ticket("TGT-1-shared", Service::new("https://a.example.org"), false)
        .await
        .expect("grant on A");
    let st_b = factory(Arc::new(b.local.clone()))
        .create_service_ticket("TGT-1-shared", Service::new("https://b.example.org"), false)
        .await
        .expect("grant on B");
    let parent_a = a.local.load("TGT-1-shared").await.expect("load").expect("parent on A");
    let parent_b = b.local.load("TGT-1-shared").await.expect("load").expect("parent on B");
    assert_eq!(parent_a.revision(), parent_b.revision());

    for command in grant_commands(&a, &st_a, &parent_a, &codec) {
        assert_eq!(b.receiver.apply(&command).await.expect("apply on B"), ApplyOutcome::Applied);
    }
    for command in grant_commands(&b, &st_b, &parent_b, &codec) {
        assert_eq!(a.receiver.apply(&command).await.expect("apply on A"), ApplyOutcome::Applied);
    }

    let on_a = a.local.load("TGT-1-shared").await.expect("load").expect("parent on A");
    let on_b = b.local.load("TGT-1-shared").await.expect("load").expect("parent on B");
    assert_eq!(on_a, on_b, "nodes diverged");
    for st in [&st_a, &st_b] {
        assert!(on_a.descendant_ticket_ids().contains(st.id()), "{} lost", st.id());
    }

    let removed = CascadingRevocation::new(Arc::new(a.local.clone()) as Arc<dyn TicketRegistry>)
        .revoke("TGT-1-shared")
        .await
        .expect("revoke");
    assert_eq!(removed, 3);
    assert!(a.local.is_empty());
}
