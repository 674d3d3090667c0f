//! Command transports.
//!
//! A transport moves opaque command frames between nodes. The schema and
//! loop prevention live above it, so any broadcast medium works: the
//! in-process bus here, a Redis channel, a Kafka topic. Every subscriber
//! receives every frame published after it subscribed, its own included.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{ReplicationError, Result};

/// Broadcast medium for command frames.
#[async_trait]
pub trait CommandTransport: Send + Sync + fmt::Debug {
    /// Broadcasts one frame to every subscriber.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Transport`] if the frame could not be handed to
    /// the medium.
    async fn publish(&self, frame: Bytes) -> Result<()>;

    /// Subscribes to frames published from now on.
    ///
    /// The stream yields [`ReplicationError::Lagged`] when frames were lost
    /// and ends when the medium shuts down.
    fn subscribe(&self) -> BoxStream<'static, Result<Bytes>>;
}

/// Transport over a Tokio broadcast channel, for nodes sharing a process.
///
/// Clones share the channel; hand one clone to each node.
///
/// ```
/// use bytes::Bytes;
/// use futures::StreamExt;
/// use tessera_replication::{CommandTransport, InProcessTransport};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let bus = InProcessTransport::new("tickets", 16);
/// let mut frames = bus.subscribe();
/// bus.publish(Bytes::from_static(b"hello")).await.unwrap();
/// assert_eq!(frames.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
/// # });
/// ```
#[derive(Clone)]
pub struct InProcessTransport {
    channel: String,
    sender: broadcast::Sender<Bytes>,
}

impl InProcessTransport {
    /// Creates a bus buffering `capacity` frames per subscriber.
    ///
    /// A zero capacity is raised to 1.
    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { channel: channel.into(), sender }
    }

    /// Channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("channel", &self.channel)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[async_trait]
impl CommandTransport for InProcessTransport {
    async fn publish(&self, frame: Bytes) -> Result<()> {
        // Sending only fails when nobody is subscribed.
        if self.sender.send(frame).is_err() {
            tracing::debug!(channel = %self.channel, "no subscribers, frame discarded");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, Result<Bytes>> {
        let receiver = self.sender.subscribe();
        Box::pin(stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(frame) => Some((Ok(frame), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    Some((Err(ReplicationError::Lagged { skipped }), receiver))
                },
                Err(RecvError::Closed) => None,
            }
        }))
    }
}
