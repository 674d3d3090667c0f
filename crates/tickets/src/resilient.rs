//! Timeout and read-retry decorator for remote registries.
//!
//! [`ResilientTicketRegistry`] bounds every call with the configured
//! operation timeout and retries reads that fail transiently. Writes are
//! bounded but never retried: an `add` that timed out may still have been
//! applied, and repeating it could double-apply. Streams are bounded per
//! item: a pass that stalls between tickets ends with an error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    config::{RetryConfig, TicketRegistryConfig},
    error::TicketResult,
    registry::TicketRegistry,
    retry::{with_retry, with_timeout},
    ticket::Ticket,
};

/// Decorator adding timeouts and read retries to a [`TicketRegistry`].
#[derive(Debug, Clone)]
pub struct ResilientTicketRegistry<R> {
    inner: R,
    operation_timeout: Duration,
    retry: RetryConfig,
}

impl<R: TicketRegistry> ResilientTicketRegistry<R> {
    /// Wraps `inner` with explicit settings.
    pub fn new(inner: R, operation_timeout: Duration, retry: RetryConfig) -> Self {
        Self { inner, operation_timeout, retry }
    }

    /// Wraps `inner` with the timeout and retry policy from `config`.
    pub fn from_config(inner: R, config: &TicketRegistryConfig) -> Self {
        Self::new(inner, config.operation_timeout, config.retry.clone())
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: TicketRegistry> TicketRegistry for ResilientTicketRegistry<R> {
    async fn add(&self, ticket: Ticket) -> TicketResult<Ticket> {
        with_timeout(self.operation_timeout, "add", self.inner.add(ticket)).await
    }

    async fn get(&self, id: &str) -> TicketResult<Option<Ticket>> {
        with_retry(&self.retry, "get", || {
            with_timeout(self.operation_timeout, "get", self.inner.get(id))
        })
        .await
    }

    async fn load(&self, id: &str) -> TicketResult<Option<Ticket>> {
        with_retry(&self.retry, "load", || {
            with_timeout(self.operation_timeout, "load", self.inner.load(id))
        })
        .await
    }

    async fn update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        with_timeout(self.operation_timeout, "update", self.inner.update(ticket)).await
    }

    async fn compare_and_update(&self, ticket: Ticket) -> TicketResult<Ticket> {
        let operation = self.inner.compare_and_update(ticket);
        with_timeout(self.operation_timeout, "compare_and_update", operation).await
    }

    async fn add_child(&self, child: Ticket, parent: Ticket) -> TicketResult<(Ticket, Ticket)> {
        with_timeout(self.operation_timeout, "add_child", self.inner.add_child(child, parent)).await
    }

    async fn put(&self, ticket: Ticket) -> TicketResult<()> {
        with_timeout(self.operation_timeout, "put", self.inner.put(ticket)).await
    }

    async fn merge(&self, ticket: Ticket) -> TicketResult<Option<Ticket>> {
        with_timeout(self.operation_timeout, "merge", self.inner.merge(ticket)).await
    }

    async fn delete(&self, id: &str) -> TicketResult<u64> {
        with_timeout(self.operation_timeout, "delete", self.inner.delete(id)).await
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        with_timeout(self.operation_timeout, "delete_all", self.inner.delete_all()).await
    }

    fn stream(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        let timeout = self.operation_timeout;
        stream::unfold(Some(self.inner.stream()), move |pending| async move {
            let mut inner = pending?;
            match with_timeout(timeout, "stream", async { Ok(inner.next().await) }).await {
                Ok(Some(item)) => Some((item, Some(inner))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}
