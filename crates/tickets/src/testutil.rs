//! Shared test utilities for ticket registry testing.
//!
//! Fixture builders, a [`ManualClock`]-driven registry and assertion macros
//! used by this crate's tests and by downstream crates. Feature-gated behind
//! `testutil` so it never ships in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! tessera-tickets = { path = "../tickets", features = ["testutil"] }
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::{
    catalog::TicketCatalog,
    clock::{Clock, ManualClock},
    config::TicketRegistryConfig,
    expiration::ExpirationPolicy,
    factory::DefaultTicketFactory,
    memory::MemoryTicketRegistry,
    registry::TicketRegistry,
    revocation::SingleLogoutNotifier,
    ticket::{
        Attributes, Authentication, GrantingTicket, Principal, Service, ServiceTicket, Ticket,
        TicketKind,
    },
};

/// Fixed instant fixtures are created at.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now)
}

/// Service used by fixtures.
#[must_use]
pub fn test_service() -> Service {
    Service::new("https://app.example.org")
}

/// Authentication for `principal` at [`epoch`].
#[must_use]
pub fn authentication(principal: &str) -> Authentication {
    Authentication::builder()
        .principal(Principal::new(principal))
        .authentication_date(epoch())
        .attributes(Attributes::new())
        .build()
}

/// Ticket-granting ticket with an 8h/2h policy, created at [`epoch`].
#[must_use]
pub fn ticket_granting_ticket_fixture(id: &str, principal: &str) -> Ticket {
    ticket_granting_ticket_fixture_at(id, principal, epoch())
}

/// Ticket-granting ticket with an 8h/2h policy, created at `at`.
#[must_use]
pub fn ticket_granting_ticket_fixture_at(id: &str, principal: &str, at: DateTime<Utc>) -> Ticket {
    Ticket::new(
        id.to_string(),
        at,
        ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: Duration::from_secs(8 * 3600),
            time_to_kill: Duration::from_secs(2 * 3600),
        },
        TicketKind::TicketGranting(GrantingTicket {
            authentication: authentication(principal),
            parent_ticket_granting_ticket_id: None,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            proxied_by: None,
        }),
    )
}

/// Single-use service ticket with a 10s lifetime, created at [`epoch`].
#[must_use]
pub fn service_ticket_fixture(id: &str, ticket_granting_ticket_id: &str) -> Ticket {
    service_ticket_fixture_at(id, ticket_granting_ticket_id, epoch())
}

/// Single-use service ticket with a 10s lifetime, created at `at`.
#[must_use]
pub fn service_ticket_fixture_at(
    id: &str,
    ticket_granting_ticket_id: &str,
    at: DateTime<Utc>,
) -> Ticket {
    Ticket::new(
        id.to_string(),
        at,
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
        },
        TicketKind::Service(ServiceTicket {
            service: test_service(),
            ticket_granting_ticket_id: ticket_granting_ticket_id.to_string(),
            credential_provided: false,
            consumed: false,
        }),
    )
}

/// Catalog built from [`TicketRegistryConfig::default`].
///
/// # Panics
///
/// Panics if the default configuration is invalid.
#[must_use]
pub fn test_catalog() -> TicketCatalog {
    TicketCatalog::from_config(&TicketRegistryConfig::default())
        .expect("default config builds a catalog")
}

/// Empty registry on a [`ManualClock`] frozen at [`epoch`].
#[must_use]
pub fn test_registry_with_clock() -> (MemoryTicketRegistry, ManualClock) {
    let clock = ManualClock::new(epoch());
    let registry = MemoryTicketRegistry::builder()
        .catalog(test_catalog())
        .clock(Arc::new(clock.clone()) as Arc<dyn Clock>)
        .build();
    (registry, clock)
}

/// Factory over `registry` sharing `clock`, with default configuration.
///
/// # Panics
///
/// Panics if the default configuration is invalid.
#[must_use]
pub fn test_factory(registry: Arc<dyn TicketRegistry>, clock: ManualClock) -> DefaultTicketFactory {
    DefaultTicketFactory::from_config(
        &TicketRegistryConfig::default(),
        registry,
        Arc::new(clock) as Arc<dyn Clock>,
    )
    .expect("default config builds a factory")
}

/// Logout notifier that records the ids it was handed.
#[derive(Debug, Default)]
pub struct RecordingLogoutNotifier {
    notified: Mutex<Vec<String>>,
}

impl RecordingLogoutNotifier {
    /// Ids notified so far, in call order.
    #[must_use]
    pub fn notified(&self) -> Vec<String> {
        self.notified.lock().clone()
    }
}

#[async_trait]
impl SingleLogoutNotifier for RecordingLogoutNotifier {
    async fn notify(&self, ticket: &Ticket) {
        self.notified.lock().push(ticket.id().to_string());
    }
}

/// Assert that a [`TicketResult`](crate::TicketResult) is a
/// [`TicketError::Conflict`](crate::TicketError::Conflict).
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TicketError::Conflict { .. })),
            "expected TicketError::Conflict, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`TicketResult`](crate::TicketResult) is a
/// [`TicketError::InvalidTicketState`](crate::TicketError::InvalidTicketState).
#[macro_export]
macro_rules! assert_invalid_state {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TicketError::InvalidTicketState { .. })),
            "expected TicketError::InvalidTicketState, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TicketError::InvalidTicketState { .. })),
            "{}: expected TicketError::InvalidTicketState, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a [`TicketResult`](crate::TicketResult) is a
/// [`TicketError::DuplicateTicket`](crate::TicketError::DuplicateTicket).
#[macro_export]
macro_rules! assert_duplicate {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TicketError::DuplicateTicket { .. })),
            "expected TicketError::DuplicateTicket, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`TicketResult`](crate::TicketResult) is a
/// [`TicketError::UnknownTicketType`](crate::TicketError::UnknownTicketType).
#[macro_export]
macro_rules! assert_unknown_type {
    ($result:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::TicketError::UnknownTicketType { .. })),
            "expected TicketError::UnknownTicketType, got: {:?}",
            result,
        );
    }};
}
