//! Shared test utilities for replication testing.
//!
//! Builds clusters of nodes sharing one [`InProcessTransport`]. Feature-gated
//! behind `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! tessera-replication = { path = "../replication", features = ["testutil"] }
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use tessera_tickets::{
    JsonTicketCodec, MemoryTicketRegistry, TicketCodec, TicketRegistry, testutil::test_catalog,
};

use crate::{config::ReplicationConfig, node::ReplicationNode, transport::InProcessTransport};

/// How long [`eventually`] waits before failing.
pub const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Nodes wired to one in-process bus.
#[derive(Debug)]
pub struct TestCluster {
    /// The shared bus.
    pub bus: InProcessTransport,
    /// Nodes in creation order, named `node-0`, `node-1`, ...
    pub nodes: Vec<ReplicationNode>,
    /// Each node's undecorated registry, by index.
    pub locals: Vec<MemoryTicketRegistry>,
}

impl TestCluster {
    /// Starts `size` nodes with plain JSON payloads.
    ///
    /// # Panics
    ///
    /// Panics if a node fails to start.
    #[must_use]
    pub fn start(size: usize) -> Self {
        Self::start_with_codec(size, Arc::new(JsonTicketCodec::with_catalog(test_catalog())))
    }

    /// Starts `size` nodes sharing `codec`.
    ///
    /// # Panics
    ///
    /// Panics if a node fails to start.
    #[must_use]
    pub fn start_with_codec(size: usize, codec: Arc<dyn TicketCodec>) -> Self {
        let bus = InProcessTransport::new("test-tickets", 1024);
        let mut nodes = Vec::with_capacity(size);
        let mut locals = Vec::with_capacity(size);
        for index in 0..size {
            let local = MemoryTicketRegistry::builder().catalog(test_catalog()).build();
            let node = ReplicationNode::builder()
                .config(ReplicationConfig::builder().publisher_id(format!("node-{index}")).build())
                .local(Arc::new(local.clone()))
                .transport(Arc::new(bus.clone()))
                .codec(Arc::clone(&codec))
                .build()
                .expect("node starts");
            nodes.push(node);
            locals.push(local);
        }
        Self { bus, nodes, locals }
    }

    /// Replicating registry of node `index`.
    #[must_use]
    pub fn registry(&self, index: usize) -> Arc<dyn TicketRegistry> {
        self.nodes[index].registry()
    }

    /// Stops every node.
    pub async fn shutdown(self) {
        for node in self.nodes {
            node.shutdown().await;
        }
    }
}

/// Polls `check` until it returns `true`.
///
/// # Panics
///
/// Panics if `check` is still false after [`EVENTUALLY_TIMEOUT`].
#[allow(clippy::panic)]
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
