//! Ticket registry configuration.
//!
//! [`TicketRegistryConfig`] carries every tunable of the ticket subsystem:
//! per-type expiration settings, id generation, session tracking, the
//! background cleaner, and the timeout/retry policy applied to the backing
//! store. It deserializes from any `serde` format with human-readable
//! durations (`"8h"`, `"10s"`), and can be assembled in code with `bon`
//! builders.
//!
//! ```
//! use std::time::Duration;
//!
//! use tessera_tickets::config::TicketRegistryConfig;
//!
//! let config: TicketRegistryConfig = serde_json::from_str(
//!     r#"{ "service_ticket": { "number_of_uses": 1, "time_to_kill": "15s" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.service_ticket.time_to_kill, Duration::from_secs(15));
//! assert!(config.validate().is_ok());
//! ```

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::CryptoConfig,
    error::ConfigError,
    expiration::ExpirationPolicy,
    id::{DEFAULT_RANDOM_LENGTH, MIN_RANDOM_LENGTH},
};

fn default_tgt_max_time_to_live() -> Duration {
    Duration::from_secs(8 * 60 * 60)
}

fn default_tgt_time_to_kill() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_remember_me_time_to_live() -> Duration {
    Duration::from_secs(14 * 24 * 60 * 60)
}

fn default_number_of_uses() -> u32 {
    1
}

fn default_service_ticket_time_to_kill() -> Duration {
    Duration::from_secs(10)
}

fn default_transient_time_to_kill() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_random_length() -> usize {
    DEFAULT_RANDOM_LENGTH
}

fn default_true() -> bool {
    true
}

fn default_start_delay() -> Duration {
    Duration::from_secs(20)
}

fn default_repeat_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_modify_attempts() -> u32 {
    16
}

/// Remember-me lifetime for ticket-granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RememberMeConfig {
    /// Absolute lifetime of remembered sessions.
    #[serde(with = "humantime_serde", default = "default_remember_me_time_to_live")]
    #[builder(default = default_remember_me_time_to_live())]
    pub max_time_to_live: Duration,
}

/// Throttling for ticket-granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Idle timeout.
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
    /// Minimum time between two uses.
    #[serde(with = "humantime_serde")]
    pub time_in_between_uses: Duration,
}

/// Ticket-granting ticket lifetime.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketGrantingTicketConfig {
    /// Absolute lifetime. Zero together with a zero `time_to_kill` means never expire.
    #[serde(with = "humantime_serde", default = "default_tgt_max_time_to_live")]
    #[builder(default = default_tgt_max_time_to_live())]
    pub max_time_to_live: Duration,

    /// Idle timeout. Zero disables the sliding window.
    #[serde(with = "humantime_serde", default = "default_tgt_time_to_kill")]
    #[builder(default = default_tgt_time_to_kill())]
    pub time_to_kill: Duration,

    /// Replaces the idle/hard selection with a throttled policy.
    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,

    /// Separate lifetime for remember-me logins.
    #[serde(default)]
    pub remember_me: Option<RememberMeConfig>,
}

impl Default for TicketGrantingTicketConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TicketGrantingTicketConfig {
    /// Selects the policy for new ticket-granting tickets.
    ///
    /// Both limits zero gives `NeverExpires`; a throttle gives
    /// `ThrottledUseAndTimeout`; both limits set give `TicketGrantingTicket`;
    /// only one limit set gives `HardTimeout` or `Timeout`. A remember-me
    /// setting wraps the result in `RememberMe`.
    #[must_use]
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        let max = self.max_time_to_live;
        let idle = self.time_to_kill;
        let base = if let Some(throttle) = &self.throttle {
            ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill: throttle.time_to_kill,
                time_in_between_uses: throttle.time_in_between_uses,
            }
        } else {
            match (max.is_zero(), idle.is_zero()) {
                (true, true) => ExpirationPolicy::NeverExpires,
                (false, false) => {
                    ExpirationPolicy::TicketGrantingTicket { max_time_to_live: max, time_to_kill: idle }
                },
                (false, true) => ExpirationPolicy::hard_timeout(max),
                (true, false) => ExpirationPolicy::timeout(idle),
            }
        };

        match &self.remember_me {
            Some(remember_me) => ExpirationPolicy::RememberMe {
                remember_me: Box::new(ExpirationPolicy::hard_timeout(remember_me.max_time_to_live)),
                default: Box::new(base),
            },
            None => base,
        }
    }
}

/// Service and proxy ticket lifetime.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceTicketConfig {
    /// Uses before the ticket is spent.
    #[serde(default = "default_number_of_uses")]
    #[builder(default = default_number_of_uses())]
    pub number_of_uses: u32,

    /// Lifetime from creation.
    #[serde(with = "humantime_serde", default = "default_service_ticket_time_to_kill")]
    #[builder(default = default_service_ticket_time_to_kill())]
    pub time_to_kill: Duration,
}

impl Default for ServiceTicketConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServiceTicketConfig {
    /// `MultiTimeUseOrTimeout` with the configured limits.
    #[must_use]
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: self.number_of_uses,
            time_to_kill: self.time_to_kill,
        }
    }
}

/// Transient session ticket lifetime.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransientTicketConfig {
    /// Lifetime from creation.
    #[serde(with = "humantime_serde", default = "default_transient_time_to_kill")]
    #[builder(default = default_transient_time_to_kill())]
    pub time_to_kill: Duration,
}

impl Default for TransientTicketConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransientTicketConfig {
    /// Hard timeout of `time_to_kill`.
    #[must_use]
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::hard_timeout(self.time_to_kill)
    }
}

/// Ticket id generation.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdGeneratorConfig {
    /// Length of the random segment.
    #[serde(default = "default_random_length")]
    #[builder(default = default_random_length())]
    pub random_length: usize,

    /// Node suffix appended to every id.
    #[serde(default)]
    #[builder(into)]
    pub suffix: Option<String>,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Background cleaner schedule.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanerConfig {
    /// Whether the cleaner runs at all.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub enabled: bool,

    /// Delay before the first sweep.
    #[serde(with = "humantime_serde", default = "default_start_delay")]
    #[builder(default = default_start_delay())]
    pub start_delay: Duration,

    /// Time between sweeps.
    #[serde(with = "humantime_serde", default = "default_repeat_interval")]
    #[builder(default = default_repeat_interval())]
    pub repeat_interval: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Retry policy for registry reads.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound of a single delay.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Top-level ticket registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketRegistryConfig {
    /// Ticket-granting tickets.
    #[serde(default)]
    #[builder(default)]
    pub ticket_granting_ticket: TicketGrantingTicketConfig,

    /// Service tickets.
    #[serde(default)]
    #[builder(default)]
    pub service_ticket: ServiceTicketConfig,

    /// Proxy tickets.
    #[serde(default)]
    #[builder(default)]
    pub proxy_ticket: ServiceTicketConfig,

    /// Proxy-granting tickets. Defaults to the ticket-granting policy.
    #[serde(default)]
    pub proxy_granting_ticket: Option<ExpirationPolicy>,

    /// Transient session tickets.
    #[serde(default)]
    #[builder(default)]
    pub transient_ticket: TransientTicketConfig,

    /// Id generation.
    #[serde(default)]
    #[builder(default)]
    pub id_generator: IdGeneratorConfig,

    /// Keep only the newest service ticket per service in a TGT's tracked services.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub only_track_most_recent_session: bool,

    /// Background cleaner.
    #[serde(default)]
    #[builder(default)]
    pub cleaner: CleanerConfig,

    /// Bound on a single backing-store call.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    #[builder(default = default_operation_timeout())]
    pub operation_timeout: Duration,

    /// Retry policy for reads.
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,

    /// Attempts of a compare-and-update loop before giving up.
    #[serde(default = "default_modify_attempts")]
    #[builder(default = default_modify_attempts())]
    pub modify_attempts: u32,

    /// Crypto settings keyed by ticket prefix.
    #[serde(default)]
    #[builder(default)]
    pub crypto: BTreeMap<String, CryptoConfig>,
}

impl Default for TicketRegistryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TicketRegistryConfig {
    /// Policy for proxy-granting tickets.
    #[must_use]
    pub fn proxy_granting_ticket_policy(&self) -> ExpirationPolicy {
        self.proxy_granting_ticket
            .clone()
            .unwrap_or_else(|| self.ticket_granting_ticket.expiration_policy())
    }

    /// Checks value ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let use_limits = [
            ("service_ticket.number_of_uses", &self.service_ticket),
            ("proxy_ticket.number_of_uses", &self.proxy_ticket),
        ];
        for (field, config) in use_limits {
            if config.number_of_uses == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1".into(),
                    value: "0".into(),
                });
            }
        }
        if self.id_generator.random_length < MIN_RANDOM_LENGTH {
            return Err(ConfigError::BelowMinimum {
                field: "id_generator.random_length",
                min: MIN_RANDOM_LENGTH.to_string(),
                value: self.id_generator.random_length.to_string(),
            });
        }
        if self.cleaner.enabled && self.cleaner.repeat_interval.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "cleaner.repeat_interval",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "operation_timeout",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid {
                field: "retry.initial_backoff",
                reason: format!(
                    "{:?} exceeds max_backoff {:?}",
                    self.retry.initial_backoff, self.retry.max_backoff
                ),
            });
        }
        if self.modify_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "modify_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        for crypto in self.crypto.values() {
            crypto.validate()?;
        }
        Ok(())
    }
}
