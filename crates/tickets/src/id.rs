//! Ticket identifier generation.
//!
//! Ids have the shape `<PREFIX>-<sequence>-<random>[-<suffix>]`. The prefix
//! routes a lookup to its [`TicketDefinition`](crate::catalog::TicketDefinition)
//! without a registry round trip; the random segment comes from a
//! cryptographically secure generator so uniqueness is probabilistic and never
//! checked against storage. The optional suffix identifies the issuing node.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::{Rng, distributions::Alphanumeric};

use crate::error::ConfigError;

/// Prefix of ticket-granting tickets.
pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";
/// Prefix of service tickets.
pub const SERVICE_TICKET_PREFIX: &str = "ST";
/// Prefix of proxy tickets.
pub const PROXY_TICKET_PREFIX: &str = "PT";
/// Prefix of proxy-granting tickets.
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";
/// Prefix of proxy-granting ticket IOUs handed to proxy callbacks.
pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";
/// Prefix of generic transient session tickets.
pub const TRANSIENT_SESSION_TICKET_PREFIX: &str = "TST";

/// Separator between id segments.
pub const SEPARATOR: char = '-';

/// Default length of the random segment.
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// Shortest random segment accepted by [`DefaultUniqueTicketIdGenerator`].
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Produces globally unique ticket ids.
pub trait UniqueTicketIdGenerator: Send + Sync + fmt::Debug {
    /// Returns a fresh id starting with `prefix`.
    fn new_ticket_id(&self, prefix: &str) -> String;
}

/// Extracts the prefix segment of a ticket id.
///
/// Returns the whole input when no separator is present, so a bare prefix
/// (`"ST"`) resolves to itself.
///
/// ```
/// use tessera_tickets::id::prefix_of;
///
/// assert_eq!(prefix_of("PGTIOU-12-abc-node1"), "PGTIOU");
/// assert_eq!(prefix_of("ST"), "ST");
/// ```
#[must_use]
pub fn prefix_of(id: &str) -> &str {
    id.split_once(SEPARATOR).map_or(id, |(prefix, _)| prefix)
}

/// Counter plus secure random segment plus optional node suffix.
#[derive(Debug)]
pub struct DefaultUniqueTicketIdGenerator {
    counter: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
}

#[bon::bon]
impl DefaultUniqueTicketIdGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `random_length` is shorter than
    /// [`MIN_RANDOM_LENGTH`], and [`ConfigError::Invalid`] if the suffix is
    /// empty or not alphanumeric.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RANDOM_LENGTH)] random_length: usize,
        #[builder(into)] suffix: Option<String>,
    ) -> Result<Self, ConfigError> {
        if random_length < MIN_RANDOM_LENGTH {
            return Err(ConfigError::BelowMinimum {
                field: "random_length",
                min: MIN_RANDOM_LENGTH.to_string(),
                value: random_length.to_string(),
            });
        }
        if let Some(suffix) = &suffix
            && (suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '.'))
        {
            return Err(ConfigError::Invalid {
                field: "suffix",
                reason: format!("'{suffix}' must be non-empty and contain only [A-Za-z0-9.]"),
            });
        }
        Ok(Self { counter: AtomicU64::new(0), random_length, suffix })
    }
}

impl Default for DefaultUniqueTicketIdGenerator {
    fn default() -> Self {
        Self { counter: AtomicU64::new(0), random_length: DEFAULT_RANDOM_LENGTH, suffix: None }
    }
}

impl UniqueTicketIdGenerator for DefaultUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();

        let mut id = format!("{prefix}{SEPARATOR}{sequence}{SEPARATOR}{random}");
        if let Some(suffix) = &self.suffix {
            id.push(SEPARATOR);
            id.push_str(suffix);
        }
        id
    }
}
