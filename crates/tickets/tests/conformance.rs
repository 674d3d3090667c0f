//! Runs the shared registry conformance suite against the in-memory
//! registry and the decorators that wrap it.
//!
//! Each suite function gets its own `#[tokio::test]` so failures point at
//! the contract that broke; `run_all` variants cover the decorators.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use tessera_tickets::{
    AuditedTicketRegistry, MemoryTicketRegistry, ResilientTicketRegistry, TicketRegistryConfig,
    audit::NoopAuditLogger, conformance, testutil::test_catalog,
};

fn memory() -> MemoryTicketRegistry {
    MemoryTicketRegistry::builder().catalog(test_catalog()).build()
}

macro_rules! conformance_tests {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                conformance::$name(&memory()).await;
            }
        )*
    };
}

conformance_tests!(
    crud_get_returns_none_for_missing_ticket,
    crud_add_then_get_returns_ticket,
    crud_add_duplicate_is_rejected,
    crud_add_unknown_prefix_is_rejected,
    crud_update_persists_mutations,
    crud_update_missing_ticket_is_invalid_state,
    crud_delete_returns_one_then_zero,
    crud_delete_does_not_recurse,
    crud_ids_are_distinct,
    expiration_hides_expired_from_get,
    expiration_typed_lookup_checks_type,
    revision_stale_copy_conflicts,
    revision_missing_ticket_conflicts,
    revision_add_child_stores_both,
    revision_add_child_stale_parent_stores_nothing,
    revision_put_is_idempotent,
    bulk_stream_yields_all_tickets,
    bulk_delete_all_empties_registry,
);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumption_exactly_one_winner() {
    conformance::concurrent_consumption_exactly_one_winner(Arc::new(memory())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_children_are_all_kept() {
    conformance::concurrent_children_are_all_kept(Arc::new(memory())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_registry_passes_full_suite() {
    conformance::run_all(Arc::new(memory())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn audited_registry_passes_full_suite() {
    let registry = AuditedTicketRegistry::new(memory(), NoopAuditLogger, "conformance");
    conformance::run_all(Arc::new(registry)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resilient_registry_passes_full_suite() {
    let registry = ResilientTicketRegistry::from_config(memory(), &TicketRegistryConfig::default());
    conformance::run_all(Arc::new(registry)).await;
}
