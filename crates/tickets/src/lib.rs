//! Ticket lifecycle and registry for single sign-on services.
//!
//! This crate defines the ticket data model (ticket-granting, service,
//! proxy-granting, proxy and transient tickets), the [`TicketRegistry`]
//! storage contract every backend satisfies, and the algorithms built on
//! top of it: expiration policies, id generation, the ticket factory,
//! cascading revocation and the background cleaner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Authentication flows / protocol endpoints            │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     DefaultTicketFactory     │  CascadingRevocation/Cleaner │
//! │  (ids, policies, parenting)  │   (single logout, sweeping)  │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │   Decorators: Audited / Resilient / Replicating (external)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 TicketRegistry trait                        │
//! │   (add, get, load, update, compare_and_update, add_child,   │
//! │    put, delete, delete_all, stream)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MemoryTicketRegistry + TicketCodec (plain or encrypted)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera_tickets::{
//!     DefaultTicketFactory, MemoryTicketRegistry, TicketCatalog, TicketRegistry,
//!     TicketRegistryConfig, TicketRegistryExt,
//!     clock::SystemClock,
//!     revocation::CascadingRevocation,
//!     ticket::{Authentication, Principal, Service},
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = TicketRegistryConfig::default();
//! let catalog = TicketCatalog::from_config(&config).unwrap();
//! let registry: Arc<dyn TicketRegistry> =
//!     Arc::new(MemoryTicketRegistry::builder().catalog(catalog).build());
//! let factory =
//!     DefaultTicketFactory::from_config(&config, registry.clone(), Arc::new(SystemClock)).unwrap();
//!
//! let authentication = Authentication::builder().principal(Principal::new("casuser")).build();
//! let tgt = factory.create_ticket_granting_ticket(authentication).await.unwrap();
//! let service = Service::new("https://app.example.org");
//! let st = factory.create_service_ticket(tgt.id(), service.clone(), false).await.unwrap();
//!
//! // Single use: the first validation wins, the second is rejected.
//! assert!(registry.consume_service_ticket(st.id(), &service).await.is_ok());
//! assert!(registry.consume_service_ticket(st.id(), &service).await.is_err());
//!
//! // Logout tears down the whole session.
//! let removed = CascadingRevocation::new(registry.clone()).revoke(tgt.id()).await.unwrap();
//! assert_eq!(removed, 2);
//! # });
//! ```
//!
//! # Error Handling
//!
//! All operations return [`TicketResult<T>`]. Catalog and state errors
//! ([`TicketError::UnknownTicketType`], [`TicketError::InvalidTicketState`])
//! are deterministic; [`TicketError::RegistryUnavailable`] is the only
//! transient variant and is what [`ResilientTicketRegistry`] retries.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (fixtures, a manual clock registry, assertion
//!   macros) and the `conformance` suite. Enable this in `[dev-dependencies]` for integration
//!   tests.
//! - **`failpoints`**: Activates `fail` points in the in-memory registry and retry loop.

#![deny(unsafe_code)]

pub mod audit;
pub mod audited;
pub mod catalog;
pub mod cleaner;
pub mod clock;
pub mod codec;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id;
pub mod memory;
pub mod registry;
pub mod resilient;
pub mod retry;
pub mod revocation;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod ticket;

// Re-export primary types at crate root for convenience
pub use audited::AuditedTicketRegistry;
pub use catalog::{CipherStrategy, CryptoConfig, TicketCatalog, TicketDefinition};
pub use cleaner::TicketRegistryCleaner;
pub use codec::{JsonTicketCodec, TicketCodec};
pub use config::TicketRegistryConfig;
pub use error::{BoxError, ConfigError, TicketError, TicketResult};
pub use expiration::{ExpirationPolicy, ExpirationReason};
pub use factory::DefaultTicketFactory;
pub use memory::MemoryTicketRegistry;
pub use registry::{TicketRegistry, TicketRegistryExt};
pub use resilient::ResilientTicketRegistry;
pub use revocation::CascadingRevocation;
pub use ticket::{Ticket, TicketKind, TicketType};
pub use zeroize::Zeroizing;
