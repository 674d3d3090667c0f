//! End-to-end ticket lifecycle: login, service access, proxying, logout and
//! background cleanup, wired the way a server assembles the pieces.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use chrono::Duration;
use tessera_tickets::{
    CascadingRevocation, TicketRegistry, TicketRegistryCleaner, TicketRegistryExt, TicketType,
    assert_invalid_state,
    config::CleanerConfig,
    testutil::{
        RecordingLogoutNotifier, authentication, test_factory, test_registry_with_clock,
        test_service,
    },
    ticket::Service,
};

#[tokio::test]
async fn full_session_with_proxy_chain_and_logout() {
    let (registry, clock) = test_registry_with_clock();
    let registry: Arc<dyn TicketRegistry> = Arc::new(registry);
    let factory = test_factory(registry.clone(), clock.clone());
    let notifier = Arc::new(RecordingLogoutNotifier::default());
    let revocation = CascadingRevocation::with_notifier(registry.clone(), notifier.clone());

    // Login, then a plain application and a proxying portal.
    let tgt = factory.create_ticket_granting_ticket(authentication("casuser")).await.expect("login");
    let app = factory
        .create_service_ticket(tgt.id(), test_service(), false)
        .await
        .expect("app ticket");
    let portal = Service::proxying("https://portal.example.org");
    let portal_st = factory
        .create_service_ticket(tgt.id(), portal.clone(), false)
        .await
        .expect("portal ticket");

    // The portal obtains a proxy-granting ticket, then validates its ticket.
    let pgt = factory
        .create_proxy_granting_ticket(portal_st.id(), authentication("https://portal.example.org"))
        .await
        .expect("proxy-granting ticket")
        .ticket;
    registry.consume_service_ticket(portal_st.id(), &portal).await.expect("portal validation");
    registry.consume_service_ticket(app.id(), &test_service()).await.expect("app validation");

    // The portal calls a backend on behalf of the user.
    let backend = Service::new("https://backend.example.org");
    let pt = factory.create_proxy_ticket(pgt.id(), backend.clone()).await.expect("proxy ticket");
    assert_eq!(pt.ticket_type(), TicketType::Proxy);
    let chain = registry.chained_authentications(pgt.id()).await.expect("chain");
    let principals: Vec<_> = chain.iter().map(|a| a.principal.id.as_str()).collect();
    assert_eq!(principals, ["https://portal.example.org", "casuser"]);
    assert_eq!(registry.root_of(pt.id()).await.expect("root").id(), tgt.id());
    registry.consume_service_ticket(pt.id(), &backend).await.expect("backend validation");

    // Logout removes the session, both service tickets, the PGT and the PT.
    assert_eq!(revocation.revoke(tgt.id()).await.expect("logout"), 5);
    let mut notified = notifier.notified();
    notified.sort();
    let mut expected = vec![app.id().to_string(), portal_st.id().to_string(), pt.id().to_string()];
    expected.sort();
    assert_eq!(notified, expected);
    assert_eq!(registry.session_count().await.expect("count"), 0);

    // Nothing can be granted from the revoked session.
    assert_invalid_state!(factory.create_service_ticket(tgt.id(), test_service(), false).await);
    assert_invalid_state!(factory.create_proxy_ticket(pgt.id(), backend).await);
}

#[tokio::test]
async fn cleaner_reclaims_idle_sessions_only() {
    let (registry, clock) = test_registry_with_clock();
    let registry: Arc<dyn TicketRegistry> = Arc::new(registry);
    let factory = test_factory(registry.clone(), clock.clone());

    let idle = factory.create_ticket_granting_ticket(authentication("idle")).await.expect("login");
    factory.create_service_ticket(idle.id(), test_service(), false).await.expect("ticket");

    // An hour later a second user logs in and stays active.
    clock.advance(Duration::hours(1));
    let active =
        factory.create_ticket_granting_ticket(authentication("active")).await.expect("login");
    clock.advance(Duration::minutes(61));
    factory.create_service_ticket(active.id(), test_service(), false).await.expect("ticket");

    let cleaner = TicketRegistryCleaner::builder()
        .registry(registry.clone())
        .revocation(CascadingRevocation::new(registry.clone()))
        .config(CleanerConfig::default())
        .build();

    // The idle session (2h01m without use) goes with its service ticket.
    let removed = cleaner.clean().await.expect("clean");
    assert_eq!(removed, 2);
    assert_eq!(registry.count_sessions_for("idle").await.expect("count"), 0);
    assert_eq!(registry.count_sessions_for("active").await.expect("count"), 1);
    assert_eq!(registry.service_ticket_count().await.expect("count"), 1);
}
