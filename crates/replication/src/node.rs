//! Node assembly.

use std::{fmt, sync::Arc};

use tessera_tickets::{ConfigError, TicketCodec, TicketRegistry};

use crate::{
    config::ReplicationConfig,
    identifier::PublisherIdentifier,
    publisher::CommandPublisher,
    receiver::CommandReceiver,
    reconcile::Reconciler,
    registry::ReplicatingTicketRegistry,
    task::TaskHandle,
    transport::CommandTransport,
};

/// One replicating server node.
///
/// Wires a local registry to a transport: writes through
/// [`registry`](Self::registry) are published, commands from peers are
/// applied to the local registry by a background receiver, and an optional
/// reconciler repairs drift against an authoritative registry.
///
/// ```
/// use std::sync::Arc;
///
/// use tessera_replication::{InProcessTransport, ReplicationConfig, ReplicationNode};
/// use tessera_tickets::{JsonTicketCodec, MemoryTicketRegistry, TicketCatalog, TicketRegistryConfig};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let catalog = TicketCatalog::from_config(&TicketRegistryConfig::default()).unwrap();
/// let bus = InProcessTransport::new("tickets", 1024);
/// let node = ReplicationNode::builder()
///     .config(ReplicationConfig::default())
///     .local(Arc::new(MemoryTicketRegistry::builder().catalog(catalog.clone()).build()))
///     .transport(Arc::new(bus))
///     .codec(Arc::new(JsonTicketCodec::with_catalog(catalog)))
///     .build()
///     .unwrap();
/// node.shutdown().await;
/// # });
/// ```
pub struct ReplicationNode {
    origin: PublisherIdentifier,
    local: Arc<dyn TicketRegistry>,
    registry: Arc<ReplicatingTicketRegistry<Arc<dyn TicketRegistry>>>,
    receiver: TaskHandle,
    reconciler: Option<TaskHandle>,
}

impl fmt::Debug for ReplicationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationNode")
            .field("origin", &self.origin)
            .field("receiver", &self.receiver)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl ReplicationNode {
    /// Validates `config`, subscribes to the transport and starts the
    /// background tasks on the current Tokio runtime.
    ///
    /// # Optional Fields
    ///
    /// * `config` - defaults to [`ReplicationConfig::default`]
    /// * `authority` - registry writes are carried to and reconciled
    ///   against; reconciliation is off without one
    ///
    /// # Errors
    ///
    /// [`ConfigError`] for an invalid configuration.
    #[builder]
    pub fn new(
        #[builder(default)] config: ReplicationConfig,
        local: Arc<dyn TicketRegistry>,
        transport: Arc<dyn CommandTransport>,
        codec: Arc<dyn TicketCodec>,
        authority: Option<Arc<dyn TicketRegistry>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let origin = config.publisher_identifier();

        let frames = transport.subscribe();
        let receiver =
            CommandReceiver::new(origin.clone(), Arc::clone(&local), Arc::clone(&codec), &config)
                .spawn(frames);

        let reconciler = match (&authority, config.reconcile_every()) {
            (Some(authority), Some(period)) => Some(
                Reconciler::new(Arc::clone(&local), Arc::clone(authority))
                    .with_grace(config.reconcile_grace)
                    .spawn(period),
            ),
            _ => None,
        };

        let publisher = CommandPublisher::new(origin.clone(), transport, codec);
        let mut registry = ReplicatingTicketRegistry::new(Arc::clone(&local), publisher);
        if let Some(authority) = authority {
            registry = registry.with_authority(authority);
        }
        let registry = Arc::new(registry);

        tracing::info!(
            origin_id = %origin,
            channel = %config.channel,
            reconciling = reconciler.is_some(),
            "replication node started",
        );
        Ok(Self { origin, local, registry, receiver, reconciler })
    }
}

impl ReplicationNode {
    /// This node's identifier.
    #[must_use]
    pub fn origin(&self) -> &PublisherIdentifier {
        &self.origin
    }

    /// The replicating registry request handlers should use.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn TicketRegistry> {
        self.registry.clone()
    }

    /// The undecorated local registry.
    #[must_use]
    pub fn local(&self) -> &Arc<dyn TicketRegistry> {
        &self.local
    }

    /// Stops the background tasks and waits for them to exit.
    pub async fn shutdown(self) {
        self.receiver.shutdown().await;
        if let Some(reconciler) = self.reconciler {
            reconciler.shutdown().await;
        }
        tracing::info!(origin_id = %self.origin, "replication node stopped");
    }
}
