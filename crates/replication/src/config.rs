//! Replication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_tickets::ConfigError;

use crate::identifier::PublisherIdentifier;

const DEFAULT_CHANNEL: &str = "tessera-tickets";

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_dedupe_capacity() -> u64 {
    10_000
}

fn default_dedupe_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_reconcile_grace() -> Duration {
    crate::reconcile::DEFAULT_RECONCILE_GRACE
}

/// Settings of one replicating node.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use tessera_replication::ReplicationConfig;
///
/// let config = ReplicationConfig::builder()
///     .channel("sso-tickets")
///     .dedupe_ttl(Duration::from_secs(60))
///     .build();
/// assert!(config.validate().is_ok());
///
/// let parsed: ReplicationConfig =
///     serde_json::from_str(r#"{"channel": "sso-tickets", "dedupe_ttl": "1m"}"#).unwrap();
/// assert_eq!(parsed, config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Name of the shared channel commands are broadcast on.
    #[serde(default = "default_channel")]
    #[builder(into, default = default_channel())]
    pub channel: String,

    /// Commands buffered per subscriber before slow receivers lag.
    #[serde(default = "default_channel_capacity")]
    #[builder(default = default_channel_capacity())]
    pub channel_capacity: usize,

    /// Command ids remembered for redelivery detection.
    #[serde(default = "default_dedupe_capacity")]
    #[builder(default = default_dedupe_capacity())]
    pub dedupe_capacity: u64,

    /// How long an applied command id is remembered.
    #[serde(with = "humantime_serde", default = "default_dedupe_ttl")]
    #[builder(default = default_dedupe_ttl())]
    pub dedupe_ttl: Duration,

    /// Period of the reconciliation sweep. Zero disables it.
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    #[builder(default = default_reconcile_interval())]
    pub reconcile_interval: Duration,

    /// Local tickets written more recently than this are never removed by
    /// reconciliation.
    #[serde(with = "humantime_serde", default = "default_reconcile_grace")]
    #[builder(default = default_reconcile_grace())]
    pub reconcile_grace: Duration,

    /// Fixed node identifier. A random one is generated when absent.
    #[serde(default)]
    pub publisher_id: Option<String>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReplicationConfig {
    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::Missing { field: "channel" });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "channel_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.dedupe_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "dedupe_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.dedupe_ttl.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "dedupe_ttl",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        if self.publisher_id.as_ref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "publisher_id",
                reason: "must not be blank".into(),
            });
        }
        Ok(())
    }

    /// Reconciliation period, `None` when disabled.
    #[must_use]
    pub fn reconcile_every(&self) -> Option<Duration> {
        (!self.reconcile_interval.is_zero()).then_some(self.reconcile_interval)
    }

    /// The configured identifier, or a fresh random one.
    #[must_use]
    pub fn publisher_identifier(&self) -> PublisherIdentifier {
        match &self.publisher_id {
            Some(id) => PublisherIdentifier::new(id.as_str()),
            None => PublisherIdentifier::random(),
        }
    }
}
