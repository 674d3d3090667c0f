//! Background sweep of expired tickets.
//!
//! Registries expire lazily: `get` hides expired tickets but they stay
//! stored. [`TicketRegistryCleaner`] reclaims them. Each run streams the
//! registry and, for every expired ticket, revokes the subtree of granting
//! tickets (so their services get logout notifications) and deletes every
//! other kind directly.
//!
//! A [`LockingStrategy`] decides whether this node may sweep. The default
//! [`NoOpLockingStrategy`] always allows it; clustered deployments plug in a
//! shared lock so a single node sweeps at a time.
//!
//! [`TicketRegistryCleaner::spawn`] runs sweeps on the configured schedule
//! until the returned [`CleanerHandle`] is dropped or shut down.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::{select, sync::watch, task::JoinHandle, time::sleep};

use crate::{
    config::CleanerConfig,
    error::TicketResult,
    registry::TicketRegistry,
    revocation::CascadingRevocation,
    ticket::Ticket,
};

/// Mutual exclusion for cleaner runs across nodes.
#[async_trait]
pub trait LockingStrategy: Send + Sync + fmt::Debug {
    /// Attempts to take the lock. Returns `false` if another holder has it.
    async fn try_lock(&self) -> bool;

    /// Releases a lock taken by [`try_lock`](Self::try_lock).
    async fn release(&self);
}

/// Lock that is always granted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

#[async_trait]
impl LockingStrategy for NoOpLockingStrategy {
    async fn try_lock(&self) -> bool {
        true
    }

    async fn release(&self) {}
}

/// Holds the shutdown signal sender. Dropping it stops the cleaner task.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // The task may already have exited.
        let _ = self.shutdown_tx.send(());
    }
}

/// Handle to a running cleaner task.
///
/// Dropping the handle signals the task to stop after its current run.
pub struct CleanerHandle {
    guard: ShutdownGuard,
    task: JoinHandle<()>,
}

impl CleanerHandle {
    /// Signals the task to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let CleanerHandle { guard, task } = self;
        drop(guard);
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "ticket registry cleaner task ended abnormally");
        }
    }
}

impl fmt::Debug for CleanerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanerHandle").field("finished", &self.task.is_finished()).finish()
    }
}

/// Periodically removes expired tickets from a registry.
#[derive(Clone)]
pub struct TicketRegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    revocation: CascadingRevocation,
    locking: Arc<dyn LockingStrategy>,
    config: CleanerConfig,
}

impl fmt::Debug for TicketRegistryCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketRegistryCleaner")
            .field("locking", &self.locking)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TicketRegistryCleaner {
    /// Creates a cleaner.
    ///
    /// # Optional Fields
    ///
    /// * `locking` - defaults to [`NoOpLockingStrategy`]
    /// * `config` - defaults to [`CleanerConfig::default`]
    #[builder]
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        revocation: CascadingRevocation,
        locking: Option<Arc<dyn LockingStrategy>>,
        #[builder(default)] config: CleanerConfig,
    ) -> Self {
        Self {
            registry,
            revocation,
            locking: locking.unwrap_or_else(|| Arc::new(NoOpLockingStrategy)),
            config,
        }
    }
}

impl TicketRegistryCleaner {
    /// Runs one sweep and returns the number of tickets removed.
    ///
    /// Returns 0 without touching the registry when the lock is held
    /// elsewhere.
    ///
    /// # Errors
    ///
    /// Propagates registry failures. The lock is released either way.
    #[tracing::instrument(skip(self))]
    pub async fn clean(&self) -> TicketResult<u64> {
        if !self.locking.try_lock().await {
            tracing::debug!("cleaner lock held elsewhere, skipping run");
            return Ok(0);
        }
        let result = self.sweep().await;
        self.locking.release().await;

        if let Ok(removed) = &result {
            tracing::info!(removed, "ticket registry cleaner run completed");
        }
        result
    }

    async fn sweep(&self) -> TicketResult<u64> {
        let now = self.registry.now();
        let expired: Vec<Ticket> = self
            .registry
            .stream()
            .try_filter(|ticket| futures::future::ready(ticket.is_expired(now)))
            .try_collect()
            .await?;

        let mut removed = 0;
        for ticket in expired {
            tracing::debug!(
                ticket_id = ticket.id(),
                reason = ?ticket.expiration(now),
                "removing expired ticket",
            );
            removed += if ticket.ticket_type().is_granting() {
                self.revocation.revoke(ticket.id()).await?
            } else {
                self.registry.delete(ticket.id()).await?
            };
        }
        Ok(removed)
    }

    /// Starts the sweep schedule on the current Tokio runtime.
    ///
    /// Returns `None` when the cleaner is disabled.
    #[must_use = "dropping the handle stops the cleaner"]
    pub fn spawn(&self) -> Option<CleanerHandle> {
        if !self.config.enabled {
            tracing::info!("ticket registry cleaner is disabled");
            return None;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cleaner = self.clone();
        let task = tokio::spawn(async move { cleaner.run(shutdown_rx).await });
        Some(CleanerHandle { guard: ShutdownGuard { shutdown_tx }, task })
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        select! {
            _ = sleep(self.config.start_delay) => {}
            _ = shutdown_rx.changed() => return,
        }
        loop {
            if let Err(err) = self.clean().await {
                tracing::warn!(error = %err, "ticket registry cleaner run failed");
            }
            select! {
                _ = sleep(self.config.repeat_interval) => {}
                _ = shutdown_rx.changed() => return,
            }
        }
    }
}
