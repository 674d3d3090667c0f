//! In-memory ticket registry.
//!
//! [`MemoryTicketRegistry`] keeps encoded tickets in one map per catalog
//! storage namespace. It is the reference implementation of
//! [`TicketRegistry`] and the local view each replicating node keeps.
//!
//! # Features
//!
//! - **Thread-safe**: a single [`parking_lot::RwLock`] guards all namespaces, so
//!   multi-ticket writes like [`add_child`](TicketRegistry::add_child) are atomic
//! - **Encoded at rest**: tickets pass through the configured [`TicketCodec`], so
//!   a signing/encrypting codec protects stored payloads and keys
//! - **Revisioned**: each entry records its revision next to the payload, so
//!   compare-and-update never needs to decode
//! - **Lazy expiration**: expired tickets stay stored until deleted but are hidden
//!   from [`get`](TicketRegistry::get)
//!
//! # Example
//!
//! ```
//! use tessera_tickets::{
//!     MemoryTicketRegistry, TicketCatalog, TicketRegistry, TicketRegistryConfig,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let catalog = TicketCatalog::from_config(&TicketRegistryConfig::default()).unwrap();
//! let registry = MemoryTicketRegistry::builder().catalog(catalog).build();
//! assert_eq!(registry.get("TGT-1-missing").await.unwrap(), None);
//! assert_eq!(registry.delete_all().await.unwrap(), 0);
//! # });
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all tickets are lost when the process exits
//! - Nothing is shared between processes; use `tessera-replication` for that

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fail::fail_point;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;

use crate::{
    catalog::TicketCatalog,
    clock::{Clock, SystemClock},
    codec::{JsonTicketCodec, TicketCodec, decode_expecting},
    error::{TicketError, TicketResult},
    registry::TicketRegistry,
    ticket::Ticket,
};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    revision: u64,
    payload: Bytes,
}

type Namespaces = HashMap<String, HashMap<String, Entry>>;

/// In-memory [`TicketRegistry`].
///
/// # Cloning
///
/// Cheaply cloneable via [`Arc`]. All clones share the same tickets.
#[derive(Clone)]
pub struct MemoryTicketRegistry {
    namespaces: Arc<RwLock<Namespaces>>,
    catalog: TicketCatalog,
    codec: Arc<dyn TicketCodec>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryTicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTicketRegistry")
            .field("tickets", &self.len())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl MemoryTicketRegistry {
    /// Creates an empty registry.
    ///
    /// The codec defaults to [`JsonTicketCodec`] bound to the catalog and the
    /// clock to [`SystemClock`].
    #[builder]
    pub fn new(
        catalog: TicketCatalog,
        codec: Option<Arc<dyn TicketCodec>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        let codec =
            codec.unwrap_or_else(|| Arc::new(JsonTicketCodec::with_catalog(catalog.clone())));
        Self {
            namespaces: Arc::new(RwLock::new(HashMap::new())),
            catalog,
            codec,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }
}

impl MemoryTicketRegistry {
    /// Number of stored tickets, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.read().values().map(HashMap::len).sum()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The catalog this registry routes by.
    #[must_use]
    pub fn catalog(&self) -> &TicketCatalog {
        &self.catalog
    }

    /// Storage namespace and key for a ticket id.
    fn locate(&self, id: &str) -> TicketResult<(String, String)> {
        let definition = self.catalog.find(id)?;
        Ok((definition.storage_name().to_string(), self.codec.storage_key(id)))
    }

    /// Like [`locate`](Self::locate), but an unregistered prefix is simply absent.
    fn locate_existing(&self, id: &str) -> Option<(String, String)> {
        match self.locate(id) {
            Ok(location) => Some(location),
            Err(err) => {
                tracing::debug!(ticket_id = id, error = %err, "ticket id does not match any catalog entry");
                None
            },
        }
    }

    fn encode_at(&self, ticket: &mut Ticket, revision: u64) -> TicketResult<Entry> {
        ticket.set_revision(revision);
        Ok(Entry {
            id: ticket.id().to_string(),
            revision,
            payload: self.codec.encode(ticket)?,
        })
    }

    fn read_entry(&self, id: &str) -> Option<Entry> {
        let (namespace, key) = self.locate_existing(id)?;
        self.namespaces.read().get(&namespace).and_then(|entries| entries.get(&key)).cloned()
    }

    fn stored_revision(namespaces: &Namespaces, namespace: &str, key: &str) -> Option<u64> {
        namespaces.get(namespace).and_then(|entries| entries.get(key)).map(|e| e.revision)
    }
}

#[async_trait]
impl TicketRegistry for MemoryTicketRegistry {
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id()))]
    async fn add(&self, mut ticket: Ticket) -> TicketResult<Ticket> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (namespace, key) = self.locate(ticket.id())?;
        let entry = self.encode_at(&mut ticket, 1)?;

        let mut namespaces = self.namespaces.write();
        let entries = namespaces.entry(namespace).or_default();
        if entries.contains_key(&key) {
            return Err(TicketError::duplicate(ticket.id()));
        }
        entries.insert(key, entry);
        tracing::debug!("ticket added");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        let Some(ticket) = self.load(id).await? else {
            return Ok(None);
        };
        if let Some(reason) = ticket.expiration(self.clock.now()) {
            tracing::debug!(?reason, "ticket is expired");
            return Ok(None);
        }
        Ok(Some(ticket))
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
        fail_point!("memory-registry-read", |_| Err(TicketError::unavailable("injected read failure")));

        match self.read_entry(id) {
            Some(entry) => decode_expecting(self.codec.as_ref(), id, &entry.payload).map(Some),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id()))]
    async fn update(&self, mut ticket: Ticket) -> TicketResult<Ticket> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (namespace, key) = self.locate(ticket.id())?;
        loop {
            let current = {
                let namespaces = self.namespaces.read();
                Self::stored_revision(&namespaces, &namespace, &key)
            }
            .ok_or_else(|| TicketError::invalid_state(ticket.id(), "ticket does not exist"))?;

            let entry = self.encode_at(&mut ticket, current + 1)?;
            let mut namespaces = self.namespaces.write();
            // Re-encode if another writer slipped in between the read and write locks.
            if Self::stored_revision(&namespaces, &namespace, &key) != Some(current) {
                continue;
            }
            namespaces.entry(namespace).or_default().insert(key, entry);
            return Ok(ticket);
        }
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id(), revision = ticket.revision()))]
    async fn compare_and_update(&self, mut ticket: Ticket) -> TicketResult<Ticket> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (namespace, key) = self.locate(ticket.id())?;
        let expected = ticket.revision();
        let entry = self.encode_at(&mut ticket, expected + 1)?;

        let mut namespaces = self.namespaces.write();
        let actual = Self::stored_revision(&namespaces, &namespace, &key).unwrap_or(0);
        if actual == 0 || actual != expected {
            return Err(TicketError::conflict(ticket.id(), expected, actual));
        }
        namespaces.entry(namespace).or_default().insert(key, entry);
        Ok(ticket)
    }

    #[tracing::instrument(
        skip(self, child, parent),
        fields(ticket_id = %child.id(), parent_id = %parent.id())
    )]
    async fn add_child(
        &self,
        mut child: Ticket,
        mut parent: Ticket,
    ) -> TicketResult<(Ticket, Ticket)> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (child_namespace, child_key) = self.locate(child.id())?;
        let (parent_namespace, parent_key) = self.locate(parent.id())?;
        let expected = parent.revision();
        let parent_entry = self.encode_at(&mut parent, expected + 1)?;
        let child_entry = self.encode_at(&mut child, 1)?;

        let mut namespaces = self.namespaces.write();
        let actual = Self::stored_revision(&namespaces, &parent_namespace, &parent_key).unwrap_or(0);
        if actual == 0 || actual != expected {
            return Err(TicketError::conflict(parent.id(), expected, actual));
        }
        if Self::stored_revision(&namespaces, &child_namespace, &child_key).is_some() {
            return Err(TicketError::duplicate(child.id()));
        }
        namespaces.entry(parent_namespace).or_default().insert(parent_key, parent_entry);
        namespaces.entry(child_namespace).or_default().insert(child_key, child_entry);
        tracing::debug!("child ticket added");
        Ok((child, parent))
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id(), revision = ticket.revision()))]
    async fn put(&self, ticket: Ticket) -> TicketResult<()> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (namespace, key) = self.locate(ticket.id())?;
        let entry = Entry {
            id: ticket.id().to_string(),
            revision: ticket.revision(),
            payload: self.codec.encode(&ticket)?,
        };
        self.namespaces.write().entry(namespace).or_default().insert(key, entry);
        Ok(())
    }

    #[tracing::instrument(skip(self, incoming), fields(ticket_id = %incoming.id(), revision = incoming.revision()))]
    async fn merge(&self, mut incoming: Ticket) -> TicketResult<Option<Ticket>> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let (namespace, key) = self.locate(incoming.id())?;
        let mut namespaces = self.namespaces.write();
        let existing = namespaces.get(&namespace).and_then(|entries| entries.get(&key));

        let Some(existing) = existing else {
            let revision = incoming.revision().max(1);
            let entry = self.encode_at(&mut incoming, revision)?;
            namespaces.entry(namespace).or_default().insert(key, entry);
            tracing::debug!("merged ticket was absent, stored as given");
            return Ok(Some(incoming));
        };

        let mut merged = decode_expecting(self.codec.as_ref(), incoming.id(), &existing.payload)?;
        let local_revision = existing.revision;
        if !merged.absorb(&incoming) {
            return Ok(None);
        }

        let incoming_revision = incoming.revision();
        merged.set_revision(incoming_revision);
        let revision = if merged == incoming && incoming_revision > local_revision {
            incoming_revision
        } else {
            local_revision.max(incoming_revision) + 1
        };
        let entry = self.encode_at(&mut merged, revision)?;
        namespaces.entry(namespace).or_default().insert(key, entry);
        tracing::debug!(revision, "ticket merged");
        Ok(Some(merged))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str) -> TicketResult<u64> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let Some((namespace, key)) = self.locate_existing(id) else {
            return Ok(0);
        };
        let removed = self
            .namespaces
            .write()
            .get_mut(&namespace)
            .and_then(|entries| entries.remove(&key))
            .map_or(0, |_| 1);
        tracing::debug!(removed, "ticket delete");
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_all(&self) -> TicketResult<u64> {
        fail_point!("memory-registry-write", |_| Err(TicketError::unavailable("injected write failure")));

        let mut namespaces = self.namespaces.write();
        let removed: usize = namespaces.values().map(HashMap::len).sum();
        namespaces.clear();
        tracing::debug!(removed, "all tickets deleted");
        Ok(removed as u64)
    }

    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        let snapshot: Vec<Entry> =
            self.namespaces.read().values().flat_map(|entries| entries.values().cloned()).collect();
        let codec = Arc::clone(&self.codec);
        stream::iter(snapshot)
            .map(move |entry| decode_expecting(codec.as_ref(), &entry.id, &entry.payload))
            .boxed()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
