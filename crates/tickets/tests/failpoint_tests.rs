#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p tessera-tickets --features failpoints --test failpoint_tests
//! ```

use std::{sync::Arc, time::Duration};

use tessera_tickets::{
    MemoryTicketRegistry, ResilientTicketRegistry, TicketRegistry,
    config::RetryConfig,
    testutil::{
        authentication, test_catalog, test_factory, test_registry_with_clock,
        ticket_granting_ticket_fixture,
    },
};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_retries(max_retries)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(5))
        .build()
}

#[tokio::test]
async fn read_failpoint_surfaces_unavailable() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-registry-read", "return").expect("failed to configure fail point");

    let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let err = registry.get("TGT-1-abc").await.expect_err("read should fail");

    assert!(err.is_transient(), "injected read failures are transient: {err}");

    scenario.teardown();
}

#[tokio::test]
async fn resilient_read_recovers_from_transient_failure() {
    let scenario = fail::FailScenario::setup();

    let inner = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    inner
        .add(ticket_granting_ticket_fixture("TGT-1-abc", "casuser"))
        .await
        .expect("add should succeed");
    fail::cfg("memory-registry-read", "2*return->off").expect("failed to configure fail point");

    let registry = ResilientTicketRegistry::new(inner, Duration::from_secs(1), fast_retry(3));
    let found = registry.load("TGT-1-abc").await.expect("retries should absorb the failures");

    assert!(found.is_some());

    scenario.teardown();
}

#[tokio::test]
async fn resilient_read_gives_up_after_max_retries() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-registry-read", "return").expect("failed to configure fail point");

    let inner = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let registry = ResilientTicketRegistry::new(inner, Duration::from_secs(1), fast_retry(2));
    let err = registry.load("TGT-1-abc").await.expect_err("read should keep failing");

    assert!(err.is_transient());

    scenario.teardown();
}

#[tokio::test]
async fn resilient_writes_are_not_retried() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-registry-write", "1*return->off").expect("failed to configure fail point");

    let inner = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let registry =
        ResilientTicketRegistry::new(inner.clone(), Duration::from_secs(1), fast_retry(3));
    let result = registry.add(ticket_granting_ticket_fixture("TGT-1-abc", "casuser")).await;

    assert!(result.is_err(), "a failed write is reported, not replayed");
    assert!(inner.is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn failed_write_leaves_factory_state_untouched() {
    let scenario = fail::FailScenario::setup();

    let (registry, clock) = test_registry_with_clock();
    let registry = Arc::new(registry);
    let factory = test_factory(registry.clone(), clock);
    fail::cfg("memory-registry-write", "return").expect("failed to configure fail point");

    let result = factory.create_ticket_granting_ticket(authentication("casuser")).await;

    assert!(result.is_err(), "login should fail while writes are failing");
    assert!(registry.is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn without_failpoint_reads_succeed() {
    let scenario = fail::FailScenario::setup();
    // No fail point configured, reads behave normally

    let registry = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
    let result = registry.get("TGT-1-abc").await;

    assert!(matches!(result, Ok(None)));

    scenario.teardown();
}
