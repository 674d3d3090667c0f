//! Conformance test suite for [`TicketRegistry`] implementations.
//!
//! Async check functions that validate a registry against the trait
//! contract. Every backend (in-memory, decorated, replicated or external)
//! runs the same suite. Registries must accept the default catalog's
//! prefixes (`TGT`, `ST`, `PT`, `PGT`, `TST`).
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each function with a registry:
//!
//! ```no_run
//! use tessera_tickets::{MemoryTicketRegistry, conformance, testutil::test_catalog};
//!
//! #[tokio::test]
//! async fn crud_add_then_get_returns_ticket() {
//!     let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
//!     conformance::crud_add_then_get_returns_ticket(&registry).await;
//! }
//! ```
//!
//! Fixtures are created at the registry's own [`now`](TicketRegistry::now),
//! and every function uses its own ticket ids, so the whole suite can run
//! against a single instance through [`run_all`].
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | CRUD | 9 tests | add/get/update/delete semantics |
//! | Expiration | 2 tests | Lazy expiration, `get` vs `load` |
//! | Revisions | 5 tests | `compare_and_update`, `add_child`, `put` |
//! | Merge | 3 tests | Joining copies from other nodes |
//! | Bulk | 2 tests | `stream`, `delete_all` |
//! | Concurrent | 2 tests | Single-use consumption, sibling creation |

use std::sync::Arc;

use futures::TryStreamExt;

use crate::{
    assert_conflict, assert_duplicate, assert_invalid_state, assert_unknown_type,
    error::TicketError,
    factory::DefaultTicketFactory,
    registry::{TicketRegistry, TicketRegistryExt},
    testutil::{
        authentication, service_ticket_fixture_at, test_catalog, test_service,
        ticket_granting_ticket_fixture_at,
    },
    ticket::{Service, Ticket, TicketType},
};

fn tgt<R: TicketRegistry + ?Sized>(registry: &R, id: &str) -> Ticket {
    ticket_granting_ticket_fixture_at(id, "casuser", registry.now())
}

fn st<R: TicketRegistry + ?Sized>(registry: &R, id: &str, parent: &str) -> Ticket {
    service_ticket_fixture_at(id, parent, registry.now())
}

// ============================================================================
// CRUD: add/get/update/delete semantics (9 tests)
// ============================================================================

/// `get` of an id that was never stored returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_ticket<R: TicketRegistry>(registry: &R) {
    let result = registry.get("TGT-0-missing").await;
    assert!(result.is_ok(), "get should not error on a missing ticket: {result:?}");
    assert_eq!(result.expect("checked above"), None);
}

/// `add` then `get` returns the stored ticket.
pub async fn crud_add_then_get_returns_ticket<R: TicketRegistry>(registry: &R) {
    let stored = registry.add(tgt(registry, "TGT-100-crud")).await.expect("add");
    assert_eq!(stored.revision(), 1, "first revision is 1");
    let fetched = registry.get("TGT-100-crud").await.expect("get");
    assert_eq!(fetched, Some(stored));
}

/// A second `add` with the same id fails with `DuplicateTicket`.
pub async fn crud_add_duplicate_is_rejected<R: TicketRegistry>(registry: &R) {
    registry.add(tgt(registry, "TGT-101-dup")).await.expect("first add");
    assert_duplicate!(registry.add(tgt(registry, "TGT-101-dup")).await);
}

/// `add` of a ticket whose prefix is not in the catalog fails.
pub async fn crud_add_unknown_prefix_is_rejected<R: TicketRegistry>(registry: &R) {
    assert_unknown_type!(registry.add(tgt(registry, "NOPE-102-x")).await);
    assert_eq!(registry.get("NOPE-102-x").await.expect("get of unknown prefix"), None);
}

/// `update` persists mutated usage fields and bumps the revision.
pub async fn crud_update_persists_mutations<R: TicketRegistry>(registry: &R) {
    let mut ticket = registry.add(tgt(registry, "TGT-103-upd")).await.expect("add");
    ticket.mark_used(registry.now());
    ticket.add_descendant("ST-103-child");
    let updated = registry.update(ticket).await.expect("update");
    assert_eq!(updated.revision(), 2);

    let fetched = registry.get("TGT-103-upd").await.expect("get").expect("present");
    assert_eq!(fetched.count_of_uses(), 1);
    assert!(fetched.descendant_ticket_ids().contains("ST-103-child"));
}

/// `update` of a ticket that is not stored fails with `InvalidTicketState`.
pub async fn crud_update_missing_ticket_is_invalid_state<R: TicketRegistry>(registry: &R) {
    assert_invalid_state!(registry.update(tgt(registry, "TGT-104-ghost")).await);
}

/// `delete` returns 1 for a stored ticket and 0 afterwards.
pub async fn crud_delete_returns_one_then_zero<R: TicketRegistry>(registry: &R) {
    registry.add(st(registry, "ST-105-del", "TGT-105-x")).await.expect("add");
    assert_eq!(registry.delete("ST-105-del").await.expect("first delete"), 1);
    assert_eq!(registry.delete("ST-105-del").await.expect("second delete"), 0);
    assert_eq!(registry.get("ST-105-del").await.expect("get"), None);
}

/// `delete` removes only the named ticket, never its descendants.
pub async fn crud_delete_does_not_recurse<R: TicketRegistry>(registry: &R) {
    let mut parent = tgt(registry, "TGT-106-p");
    parent.add_descendant("ST-106-c");
    registry.add(parent).await.expect("add parent");
    registry.add(st(registry, "ST-106-c", "TGT-106-p")).await.expect("add child");

    assert_eq!(registry.delete("TGT-106-p").await.expect("delete"), 1);
    assert!(registry.get("ST-106-c").await.expect("get").is_some(), "child must survive");
}

/// Ids are stored exactly: tickets differing in one character are distinct.
pub async fn crud_ids_are_distinct<R: TicketRegistry>(registry: &R) {
    registry.add(tgt(registry, "TGT-107-a")).await.expect("add a");
    registry.add(tgt(registry, "TGT-107-b")).await.expect("add b");
    assert_eq!(registry.delete("TGT-107-a").await.expect("delete a"), 1);
    assert!(registry.get("TGT-107-b").await.expect("get b").is_some());
}

// ============================================================================
// Expiration: lazy expiration (2 tests)
// ============================================================================

/// Expired tickets are absent from `get` but still returned by `load`.
pub async fn expiration_hides_expired_from_get<R: TicketRegistry>(registry: &R) {
    let mut ticket = tgt(registry, "TGT-200-exp");
    ticket.mark_expired();
    registry.add(ticket).await.expect("add");

    assert_eq!(registry.get("TGT-200-exp").await.expect("get"), None);
    let loaded = registry.load("TGT-200-exp").await.expect("load");
    assert!(loaded.is_some_and(|t| t.is_expired(registry.now())));
}

/// Typed lookup rejects tickets of another type.
pub async fn expiration_typed_lookup_checks_type<R: TicketRegistry>(registry: &R) {
    registry.add(st(registry, "ST-201-typed", "TGT-201-x")).await.expect("add");
    let found = registry
        .get_typed("ST-201-typed", TicketType::Service)
        .await
        .expect("typed get");
    assert_eq!(found.id(), "ST-201-typed");
    assert_invalid_state!(
        registry.get_typed("ST-201-typed", TicketType::TicketGranting).await
    );
}

// ============================================================================
// Revisions: compare_and_update, add_child, put (5 tests)
// ============================================================================

/// `compare_and_update` with the current revision succeeds; a stale copy
/// then conflicts.
pub async fn revision_stale_copy_conflicts<R: TicketRegistry>(registry: &R) {
    let original = registry.add(tgt(registry, "TGT-300-cas")).await.expect("add");
    let updated = registry.compare_and_update(original.clone()).await.expect("first cas");
    assert_eq!(updated.revision(), 2);
    assert_conflict!(registry.compare_and_update(original).await);
}

/// `compare_and_update` of a missing ticket conflicts.
pub async fn revision_missing_ticket_conflicts<R: TicketRegistry>(registry: &R) {
    let mut ghost = tgt(registry, "TGT-301-ghost");
    ghost.set_revision(1);
    assert_conflict!(registry.compare_and_update(ghost).await);
}

/// `add_child` stores the child and the updated parent together.
pub async fn revision_add_child_stores_both<R: TicketRegistry>(registry: &R) {
    let mut parent = registry.add(tgt(registry, "TGT-302-p")).await.expect("add parent");
    parent.add_descendant("ST-302-c");
    let (child, parent) =
        registry.add_child(st(registry, "ST-302-c", "TGT-302-p"), parent).await.expect("add_child");
    assert_eq!(child.revision(), 1);
    assert_eq!(parent.revision(), 2);

    let stored = registry.get("TGT-302-p").await.expect("get").expect("parent present");
    assert!(stored.descendant_ticket_ids().contains("ST-302-c"));
    assert!(registry.get("ST-302-c").await.expect("get").is_some());
}

/// `add_child` with a stale parent conflicts and stores nothing.
pub async fn revision_add_child_stale_parent_stores_nothing<R: TicketRegistry>(registry: &R) {
    let parent = registry.add(tgt(registry, "TGT-303-p")).await.expect("add parent");
    registry.compare_and_update(parent.clone()).await.expect("bump parent");

    let mut stale = parent;
    stale.add_descendant("ST-303-c");
    assert_conflict!(registry.add_child(st(registry, "ST-303-c", "TGT-303-p"), stale).await);
    assert_eq!(registry.load("ST-303-c").await.expect("load"), None);
    let stored = registry.get("TGT-303-p").await.expect("get").expect("parent present");
    assert!(stored.descendant_ticket_ids().is_empty());
}

/// `put` stores a ticket verbatim, keeps its revision, and is idempotent.
pub async fn revision_put_is_idempotent<R: TicketRegistry>(registry: &R) {
    let mut ticket = tgt(registry, "TGT-304-put");
    ticket.set_revision(7);
    registry.put(ticket.clone()).await.expect("first put");
    registry.put(ticket.clone()).await.expect("second put");
    let stored = registry.get("TGT-304-put").await.expect("get").expect("present");
    assert_eq!(stored, ticket);
    assert_eq!(stored.revision(), 7);
}

// ============================================================================
// Merge (3 tests)
// ============================================================================

/// Merging an absent ticket stores it; merging it again changes nothing.
pub async fn merge_stores_absent_ticket<R: TicketRegistry>(registry: &R) {
    let mut ticket = tgt(registry, "TGT-350-merge");
    ticket.set_revision(3);
    let stored = registry.merge(ticket.clone()).await.expect("merge").expect("stored");
    assert_eq!(stored.revision(), 3);
    assert_eq!(registry.merge(ticket).await.expect("second merge"), None);
    assert!(registry.get("TGT-350-merge").await.expect("get").is_some());
}

/// Children recorded by two copies of a parent both survive the merge.
pub async fn merge_unions_descendants<R: TicketRegistry>(registry: &R) {
    let parent = registry.add(tgt(registry, "TGT-351-p")).await.expect("add");
    let mut here = parent.clone();
    here.add_descendant("ST-351-a");
    let here = registry.compare_and_update(here).await.expect("local child");

    let mut elsewhere = parent;
    elsewhere.add_descendant("ST-351-b");
    elsewhere.set_revision(2);
    let merged = registry.merge(elsewhere).await.expect("merge").expect("changed");

    assert!(merged.revision() > here.revision());
    let stored = registry.get("TGT-351-p").await.expect("get").expect("present");
    assert!(stored.descendant_ticket_ids().contains("ST-351-a"));
    assert!(stored.descendant_ticket_ids().contains("ST-351-b"));
}

/// A late unconsumed copy never reopens a consumed ticket.
pub async fn merge_never_unconsumes<R: TicketRegistry>(registry: &R) {
    let issued = registry.add(st(registry, "ST-352-once", "TGT-352-x")).await.expect("add");
    let consumed = registry
        .consume_service_ticket("ST-352-once", &test_service())
        .await
        .expect("consume");

    registry.merge(issued).await.expect("merge");
    let stored = registry.load("ST-352-once").await.expect("load").expect("present");
    assert!(stored.is_consumed());
    assert!(stored.revision() >= consumed.revision());
}

// ============================================================================
// Bulk: stream and delete_all (2 tests)
// ============================================================================

/// `stream` yields stored tickets, expired ones included, and restarts per call.
pub async fn bulk_stream_yields_all_tickets<R: TicketRegistry>(registry: &R) {
    registry.add(tgt(registry, "TGT-400-live")).await.expect("add live");
    let mut expired = tgt(registry, "TGT-400-dead");
    expired.mark_expired();
    registry.add(expired).await.expect("add expired");

    for pass in 0..2 {
        let ids: Vec<String> = registry
            .stream()
            .map_ok(|t| t.id().to_string())
            .try_collect()
            .await
            .expect("stream");
        assert!(ids.iter().any(|id| id == "TGT-400-live"), "pass {pass} misses live ticket");
        assert!(ids.iter().any(|id| id == "TGT-400-dead"), "pass {pass} misses expired ticket");
    }
}

/// `delete_all` removes everything and reports how many tickets it removed.
pub async fn bulk_delete_all_empties_registry<R: TicketRegistry>(registry: &R) {
    registry.add(tgt(registry, "TGT-401-a")).await.expect("add");
    registry.add(st(registry, "ST-401-b", "TGT-401-a")).await.expect("add");
    let removed = registry.delete_all().await.expect("delete_all");
    assert!(removed >= 2, "delete_all removed {removed}");

    let remaining: Vec<Ticket> = registry.stream().try_collect().await.expect("stream");
    assert!(remaining.is_empty(), "registry not empty: {remaining:?}");
    assert_eq!(registry.delete_all().await.expect("second delete_all"), 0);
}

// ============================================================================
// Concurrent (2 tests)
// ============================================================================

/// Of many concurrent consumers of one single-use ticket, exactly one wins.
pub async fn concurrent_consumption_exactly_one_winner<R: TicketRegistry + 'static>(
    registry: Arc<R>,
) {
    registry.add(st(registry.as_ref(), "ST-500-race", "TGT-500-x")).await.expect("add");

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move {
            registry.consume_service_ticket("ST-500-race", &test_service()).await
        });
    }

    let mut winners = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task join") {
            Ok(_) => winners += 1,
            Err(err) => assert!(
                matches!(
                    err,
                    TicketError::InvalidTicketState { .. } | TicketError::Conflict { .. }
                ),
                "unexpected error: {err:?}"
            ),
        }
    }
    assert_eq!(winners, 1, "exactly one consumer must succeed");
}

/// Service tickets created concurrently under one TGT are all recorded on it.
pub async fn concurrent_children_are_all_kept<R: TicketRegistry + 'static>(registry: Arc<R>) {
    let factory = Arc::new(
        DefaultTicketFactory::builder()
            .registry(registry.clone() as Arc<dyn TicketRegistry>)
            .catalog(test_catalog())
            .max_attempts(64)
            .build(),
    );
    let tgt = factory
        .create_ticket_granting_ticket(authentication("casuser"))
        .await
        .expect("create tgt");

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..20 {
        let factory = Arc::clone(&factory);
        let tgt_id = tgt.id().to_string();
        tasks.spawn(async move {
            let service = Service::new(format!("https://app{i}.example.org"));
            factory.create_service_ticket(&tgt_id, service, false).await
        });
    }

    let mut created = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        created.push(joined.expect("task join").expect("create service ticket"));
    }

    let parent = registry.get(tgt.id()).await.expect("get").expect("tgt present");
    for st in &created {
        assert!(
            parent.descendant_ticket_ids().contains(st.id()),
            "{} missing from parent descendants",
            st.id()
        );
    }
    assert_eq!(parent.descendant_ticket_ids().len(), created.len());
}

// ============================================================================
// Convenience runner
// ============================================================================

/// Runs the full suite against one registry.
///
/// `bulk_delete_all_empties_registry` runs last since it clears the registry.
pub async fn run_all<R: TicketRegistry + 'static>(registry: Arc<R>) {
    // CRUD
    crud_get_returns_none_for_missing_ticket(registry.as_ref()).await;
    crud_add_then_get_returns_ticket(registry.as_ref()).await;
    crud_add_duplicate_is_rejected(registry.as_ref()).await;
    crud_add_unknown_prefix_is_rejected(registry.as_ref()).await;
    crud_update_persists_mutations(registry.as_ref()).await;
    crud_update_missing_ticket_is_invalid_state(registry.as_ref()).await;
    crud_delete_returns_one_then_zero(registry.as_ref()).await;
    crud_delete_does_not_recurse(registry.as_ref()).await;
    crud_ids_are_distinct(registry.as_ref()).await;

    // Expiration
    expiration_hides_expired_from_get(registry.as_ref()).await;
    expiration_typed_lookup_checks_type(registry.as_ref()).await;

    // Revisions
    revision_stale_copy_conflicts(registry.as_ref()).await;
    revision_missing_ticket_conflicts(registry.as_ref()).await;
    revision_add_child_stores_both(registry.as_ref()).await;
    revision_add_child_stale_parent_stores_nothing(registry.as_ref()).await;
    revision_put_is_idempotent(registry.as_ref()).await;

    // Merge
    merge_stores_absent_ticket(registry.as_ref()).await;
    merge_unions_descendants(registry.as_ref()).await;
    merge_never_unconsumes(registry.as_ref()).await;

    // Concurrent
    concurrent_consumption_exactly_one_winner(Arc::clone(&registry)).await;
    concurrent_children_are_all_kept(Arc::clone(&registry)).await;

    // Bulk
    bulk_stream_yields_all_tickets(registry.as_ref()).await;
    bulk_delete_all_empties_registry(registry.as_ref()).await;
}
