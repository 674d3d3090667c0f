//! The registry contract must hold unchanged when payloads are protected.
#![allow(clippy::expect_used)]

use std::sync::Arc;

use chrono::Utc;
use tessera_cipher::{CipherTicketCodec, testutil::catalog_with_crypto};
use tessera_tickets::{
    CipherStrategy, DefaultTicketFactory, MemoryTicketRegistry, TicketCodec, TicketRegistry,
    TicketRegistryConfig, TicketRegistryExt, clock::SystemClock, conformance,
    revocation::CascadingRevocation, testutil::authentication, ticket::Service,
};

const PROTECTED: &[&str] = &["TGT", "ST", "PGT", "PT", "TST"];

fn registry(strategy: CipherStrategy) -> MemoryTicketRegistry {
    let catalog = catalog_with_crypto(PROTECTED, strategy);
    let codec = CipherTicketCodec::new(catalog.clone()).expect("codec");
    MemoryTicketRegistry::builder()
        .catalog(catalog)
        .codec(Arc::new(codec) as Arc<dyn TicketCodec>)
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sign_only_registry_passes_conformance() {
    conformance::run_all(Arc::new(registry(CipherStrategy::SignOnly))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encrypt_only_registry_passes_conformance() {
    conformance::run_all(Arc::new(registry(CipherStrategy::EncryptOnly))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encrypt_then_sign_registry_passes_conformance() {
    conformance::run_all(Arc::new(registry(CipherStrategy::EncryptThenSign))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sign_then_encrypt_registry_passes_conformance() {
    conformance::run_all(Arc::new(registry(CipherStrategy::SignThenEncrypt))).await;
}

#[tokio::test]
async fn session_lifecycle_over_encrypted_registry() {
    let registry: Arc<dyn TicketRegistry> = Arc::new(registry(CipherStrategy::EncryptThenSign));
    let factory = DefaultTicketFactory::from_config(
        &TicketRegistryConfig::default(),
        Arc::clone(&registry),
        Arc::new(SystemClock),
    )
    .expect("factory");

    let mut login = authentication("casuser");
    login.authentication_date = Utc::now();
    let tgt = factory.create_ticket_granting_ticket(login).await.expect("login");
    let service = Service::new("https://app.example.org");
    let st = factory.create_service_ticket(tgt.id(), service.clone(), false).await.expect("st");

    assert_eq!(registry.session_count().await.expect("count"), 1);
    assert_eq!(registry.service_ticket_count().await.expect("count"), 1);
    registry.consume_service_ticket(st.id(), &service).await.expect("first validation");
    assert!(registry.consume_service_ticket(st.id(), &service).await.is_err());

    let removed = CascadingRevocation::new(Arc::clone(&registry)).revoke(tgt.id()).await;
    assert_eq!(removed.expect("revoke"), 2);
    assert!(registry.get(tgt.id()).await.expect("get").is_none());
}
