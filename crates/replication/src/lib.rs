//! Message-based replication of ticket registries across server nodes.
//!
//! Each node keeps its own registry and broadcasts every write as a
//! [`ReplicationCommand`] on a shared channel. Peers apply commands from
//! other origins to their local view; a node ignores the echo of its own
//! commands, which keeps fan-out topologies free of replication loops.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │               request handlers, factory, revocation            │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ReplicatingTicketRegistry ── CommandPublisher ──┐             │
//! │             │                                    ▼             │
//! │             │                          CommandTransport        │
//! │             ▼                         (in-process, pub/sub)    │
//! │      local TicketRegistry ◄── CommandReceiver ◄──┘             │
//! │             ▲                  (echo drop, dedupe, merge)      │
//! │             └──────────── Reconciler ◄── authoritative registry │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Delivery
//!
//! Delivery is at-least-once and only eventually consistent across nodes.
//! Commands are idempotent: an `ADD` or `UPDATE` is merged into the local
//! copy (children and tracked services are unioned, consumption and
//! revocation stick, a copy that adds nothing is dropped as stale), a
//! `DELETE` of an absent id is a no-op, and redeliveries of the same command
//! id inside the dedupe window are skipped. A command that fails to apply is logged and dropped;
//! the [`Reconciler`] is the recovery path.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera_replication::{InProcessTransport, ReplicationConfig, ReplicationNode};
//! use tessera_tickets::{
//!     JsonTicketCodec, MemoryTicketRegistry, TicketCatalog, TicketCodec, TicketRegistry,
//!     TicketRegistryConfig,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let catalog = TicketCatalog::from_config(&TicketRegistryConfig::default()).unwrap();
//! let codec: Arc<dyn TicketCodec> = Arc::new(JsonTicketCodec::with_catalog(catalog.clone()));
//! let bus = InProcessTransport::new("tickets", 1024);
//!
//! let start = |name: &str| {
//!     ReplicationNode::builder()
//!         .config(ReplicationConfig::builder().publisher_id(name.to_string()).build())
//!         .local(Arc::new(MemoryTicketRegistry::builder().catalog(catalog.clone()).build()))
//!         .transport(Arc::new(bus.clone()))
//!         .codec(codec.clone())
//!         .build()
//!         .unwrap()
//! };
//! let (a, b) = (start("node-a"), start("node-b"));
//!
//! assert_eq!(a.registry().delete_all().await.unwrap(), 0);
//! a.shutdown().await;
//! b.shutdown().await;
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod error;
pub mod identifier;
pub mod node;
pub mod publisher;
pub mod receiver;
pub mod reconcile;
pub mod registry;
pub mod task;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transport;

pub use command::{MessageType, ReplicationCommand};
pub use config::ReplicationConfig;
pub use error::{ReplicationError, Result};
pub use identifier::PublisherIdentifier;
pub use node::ReplicationNode;
pub use publisher::CommandPublisher;
pub use receiver::{ApplyOutcome, CommandReceiver};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::ReplicatingTicketRegistry;
pub use task::TaskHandle;
pub use transport::{CommandTransport, InProcessTransport};
