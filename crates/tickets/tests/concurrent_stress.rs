//! Concurrent access stress tests for the ticket lifecycle.
//!
//! Exercises the factory, the consumption path and cascading revocation
//! under multi-threaded workloads to catch lost updates and double
//! deletions. The heaviest scenario is ignored by default:
//!
//! ```bash
//! cargo test -p tessera-tickets --test concurrent_stress -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc};

use tessera_tickets::{
    CascadingRevocation, DefaultTicketFactory, MemoryTicketRegistry, TicketRegistry,
    TicketRegistryExt,
    testutil::{authentication, test_catalog, test_service},
};
use tokio::task::JoinSet;

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 12;

/// Consumers racing for each service ticket.
const RACERS: usize = 4;

fn setup() -> (Arc<dyn TicketRegistry>, Arc<DefaultTicketFactory>) {
    let registry: Arc<dyn TicketRegistry> =
        Arc::new(MemoryTicketRegistry::builder().catalog(test_catalog()).build());
    let factory = DefaultTicketFactory::builder()
        .registry(registry.clone())
        .catalog(test_catalog())
        .max_attempts(64)
        .build();
    (registry, Arc::new(factory))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_logins_yield_distinct_sessions() {
    let (registry, factory) = setup();

    let mut set = JoinSet::new();
    for i in 0..CONCURRENCY {
        let factory = Arc::clone(&factory);
        set.spawn(async move {
            let tgt = factory
                .create_ticket_granting_ticket(authentication(&format!("user{i}")))
                .await
                .expect("login should succeed");
            tgt.id().to_string()
        });
    }

    let mut ids = HashSet::new();
    while let Some(result) = set.join_next().await {
        assert!(ids.insert(result.expect("task should not panic")), "duplicate session id");
    }
    assert_eq!(registry.session_count().await.expect("count"), CONCURRENCY as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_service_tickets_are_all_linked() {
    let (registry, factory) = setup();
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("login should succeed");

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let factory = Arc::clone(&factory);
        let tgt_id = tgt.id().to_string();
        set.spawn(async move {
            factory
                .create_service_ticket(&tgt_id, test_service(), false)
                .await
                .expect("service ticket should be granted")
                .id()
                .to_string()
        });
    }

    let mut issued = HashSet::new();
    while let Some(result) = set.join_next().await {
        issued.insert(result.expect("task should not panic"));
    }

    let parent = registry.get(tgt.id()).await.expect("get").expect("session exists");
    let linked: HashSet<String> = parent.descendant_ticket_ids().iter().cloned().collect();
    assert_eq!(linked, issued, "every issued ticket must be linked to its session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_validations_consume_each_ticket_once() {
    let (registry, factory) = setup();
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("login should succeed");

    let mut tickets = Vec::new();
    for _ in 0..CONCURRENCY {
        let st = factory
            .create_service_ticket(tgt.id(), test_service(), false)
            .await
            .expect("service ticket should be granted");
        tickets.push(st.id().to_string());
    }

    let mut set = JoinSet::new();
    for id in &tickets {
        for _ in 0..RACERS {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            set.spawn(async move {
                let won = registry.consume_service_ticket(&id, &test_service()).await.is_ok();
                (id, won)
            });
        }
    }

    let mut winners = HashSet::new();
    let mut wins = 0;
    while let Some(result) = set.join_next().await {
        let (id, won) = result.expect("task should not panic");
        if won {
            wins += 1;
            winners.insert(id);
        }
    }
    assert_eq!(wins, tickets.len(), "exactly one winner per ticket");
    assert_eq!(winners.len(), tickets.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logouts_remove_each_ticket_once() {
    let (registry, factory) = setup();
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("login should succeed");
    for _ in 0..CONCURRENCY {
        factory
            .create_service_ticket(tgt.id(), test_service(), false)
            .await
            .expect("service ticket should be granted");
    }

    let mut set = JoinSet::new();
    for _ in 0..RACERS {
        let revocation = CascadingRevocation::new(Arc::clone(&registry));
        let tgt_id = tgt.id().to_string();
        set.spawn(async move { revocation.revoke(&tgt_id).await.expect("revoke should succeed") });
    }

    let mut removed = 0;
    while let Some(result) = set.join_next().await {
        removed += result.expect("task should not panic");
    }
    assert_eq!(removed, CONCURRENCY as u64 + 1, "each ticket is deleted exactly once");
    assert_eq!(registry.session_count().await.expect("count"), 0);
}

/// Many sessions each issuing tickets while validations race against them.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn mixed_lifecycle_workload() {
    const SESSIONS: usize = 64;
    const TICKETS_PER_SESSION: usize = 32;

    let (registry, factory) = setup();

    let mut set = JoinSet::new();
    for i in 0..SESSIONS {
        let factory = Arc::clone(&factory);
        let registry = Arc::clone(&registry);
        set.spawn(async move {
            let tgt = factory
                .create_ticket_granting_ticket(authentication(&format!("user{i}")))
                .await
                .expect("login should succeed");
            for _ in 0..TICKETS_PER_SESSION {
                let st = factory
                    .create_service_ticket(tgt.id(), test_service(), false)
                    .await
                    .expect("service ticket should be granted");
                registry
                    .consume_service_ticket(st.id(), &test_service())
                    .await
                    .expect("fresh ticket validates");
            }
            CascadingRevocation::new(registry).revoke(tgt.id()).await.expect("revoke")
        });
    }

    while let Some(result) = set.join_next().await {
        let removed = result.expect("task should not panic");
        assert_eq!(removed, TICKETS_PER_SESSION as u64 + 1);
    }
    assert_eq!(registry.session_count().await.expect("count"), 0);
}
