//! Audit trail for ticket registry mutations.
//!
//! An [`AuditEvent`] records who changed which ticket, how, when, and
//! whether it worked. Events go to an [`AuditLogger`]:
//!
//! - [`TracingAuditLogger`] emits them as `tracing` events under the `audit` target, ready to be
//!   routed to a SIEM by a subscriber layer.
//! - [`NoopAuditLogger`] drops them.
//!
//! [`AuditedTicketRegistry`](crate::audited::AuditedTicketRegistry) produces
//! the events around every registry write.
//!
//! ```
//! use tessera_tickets::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let event = AuditEvent::builder()
//!     .actor("node-a")
//!     .action(AuditAction::DeleteTicket)
//!     .resource("TGT-1-abc")
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Registry operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A ticket was added.
    AddTicket,
    /// A child ticket was added together with its updated parent.
    AddChildTicket,
    /// A ticket was overwritten.
    UpdateTicket,
    /// A ticket was stored verbatim, usually from replication.
    PutTicket,
    /// A copy from another node was folded into the stored ticket.
    MergeTicket,
    /// A single ticket was deleted.
    DeleteTicket,
    /// Every ticket was deleted.
    DeleteAllTickets,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTicket => write!(f, "add_ticket"),
            Self::AddChildTicket => write!(f, "add_child_ticket"),
            Self::UpdateTicket => write!(f, "update_ticket"),
            Self::PutTicket => write!(f, "put_ticket"),
            Self::MergeTicket => write!(f, "merge_ticket"),
            Self::DeleteTicket => write!(f, "delete_ticket"),
            Self::DeleteAllTickets => write!(f, "delete_all_tickets"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// One audited registry operation.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Node or component performing the operation.
    #[builder(into)]
    pub actor: String,
    /// What was done.
    pub action: AuditAction,
    /// Ticket id, or `*` for registry-wide operations.
    #[builder(into)]
    pub resource: String,
    /// Outcome.
    pub result: AuditResult,
    /// Extra context such as ticket type, revision or removal count.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Destination for audit events.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Writes events as `INFO` `tracing` events with target `audit`.
///
/// Fields: `audit.timestamp`, `audit.actor`, `audit.action`,
/// `audit.resource`, `audit.result`, `audit.metadata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::event!(
            target: "audit",
            tracing::Level::INFO,
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn action_names() {
        assert_eq!(AuditAction::AddTicket.to_string(), "add_ticket");
        assert_eq!(AuditAction::AddChildTicket.to_string(), "add_child_ticket");
        assert_eq!(AuditAction::DeleteAllTickets.to_string(), "delete_all_tickets");
    }

    #[test]
    fn result_display() {
        assert_eq!(AuditResult::Success.to_string(), "success");
        assert_eq!(AuditResult::Failure("gone".into()).to_string(), "failure: gone");
    }

    #[test]
    fn builder_defaults() {
        let event = AuditEvent::builder()
            .actor("node-a")
            .action(AuditAction::AddTicket)
            .resource("TGT-1-abc")
            .result(AuditResult::Success)
            .build();
        assert!(event.metadata.is_empty());
        assert!((Utc::now() - event.timestamp).num_seconds() < 2);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Captured {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            self.0.lock().push(event.metadata().target().to_string());
        }
    }

    #[tokio::test]
    async fn tracing_logger_uses_audit_target() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let event = AuditEvent::builder()
            .actor("node-a")
            .action(AuditAction::DeleteTicket)
            .resource("ST-1-abc")
            .result(AuditResult::Failure("not found".into()))
            .build();
        TracingAuditLogger.log(&event).await;

        assert_eq!(captured.0.lock().as_slice(), ["audit".to_string()]);
    }
}
