//! Ticket catalog.
//!
//! The catalog maps ticket prefixes to [`TicketDefinition`]s: the logical
//! [`TicketType`], the storage namespace, the expiration policy builder and
//! the optional [`CryptoConfig`]. It is assembled once with
//! [`TicketCatalogBuilder`] and is immutable afterwards, so it can be shared
//! behind an [`Arc`] by every task on a node.
//!
//! ```
//! use tessera_tickets::{
//!     ExpirationPolicy, TicketCatalog, TicketDefinition, TicketType,
//! };
//!
//! let catalog = TicketCatalog::builder()
//!     .register(
//!         TicketDefinition::builder()
//!             .prefix("ST")
//!             .ticket_type(TicketType::Service)
//!             .storage_name("service_tickets")
//!             .expiration_policy(ExpirationPolicy::usage_count(1))
//!             .build(),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let definition = catalog.find("ST-1-abcdef").unwrap();
//! assert_eq!(definition.storage_name(), "service_tickets");
//! assert!(catalog.find("XYZ-1").is_err());
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    config::TicketRegistryConfig,
    error::{ConfigError, TicketError, TicketResult},
    expiration::ExpirationPolicy,
    id::{
        PROXY_GRANTING_TICKET_PREFIX, PROXY_TICKET_PREFIX, SERVICE_TICKET_PREFIX,
        TICKET_GRANTING_TICKET_PREFIX, TRANSIENT_SESSION_TICKET_PREFIX, prefix_of,
    },
    ticket::TicketType,
};

/// Storage namespace of ticket-granting tickets.
pub const TICKET_GRANTING_TICKETS_STORAGE: &str = "ticket_granting_tickets";
/// Storage namespace of service tickets.
pub const SERVICE_TICKETS_STORAGE: &str = "service_tickets";
/// Storage namespace of proxy tickets.
pub const PROXY_TICKETS_STORAGE: &str = "proxy_tickets";
/// Storage namespace of proxy-granting tickets.
pub const PROXY_GRANTING_TICKETS_STORAGE: &str = "proxy_granting_tickets";
/// Storage namespace of transient session tickets.
pub const TRANSIENT_SESSION_TICKETS_STORAGE: &str = "transient_session_tickets";

/// Produces the expiration policy for a newly minted ticket.
pub trait ExpirationPolicyBuilder: Send + Sync + fmt::Debug {
    /// Builds the policy.
    fn build(&self) -> ExpirationPolicy;
}

impl ExpirationPolicyBuilder for ExpirationPolicy {
    fn build(&self) -> ExpirationPolicy {
        self.clone()
    }
}

/// Order of signing and encryption for a ticket type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherStrategy {
    /// HMAC only; payload stays readable.
    SignOnly,
    /// AEAD encryption only.
    EncryptOnly,
    /// Encrypt, then HMAC the cipher text.
    EncryptThenSign,
    /// HMAC the plain text, then encrypt both.
    SignThenEncrypt,
}

impl CipherStrategy {
    /// Whether this strategy needs an encryption key.
    #[must_use]
    pub fn encrypts(self) -> bool {
        !matches!(self, Self::SignOnly)
    }

    /// Whether this strategy needs a signing key.
    #[must_use]
    pub fn signs(self) -> bool {
        !matches!(self, Self::EncryptOnly)
    }
}

/// Per-type crypto settings. Keys are base64url without padding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoConfig {
    /// Sign/encrypt ordering.
    pub strategy: CipherStrategy,
    /// AES-256 key material.
    #[serde(default)]
    pub encryption_key: Option<Zeroizing<String>>,
    /// HMAC-SHA512 key material.
    #[serde(default)]
    pub signing_key: Option<Zeroizing<String>>,
}

impl CryptoConfig {
    /// Checks that the keys required by the strategy are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an absent required key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy.encrypts() && self.encryption_key.as_ref().is_none_or(|k| k.is_empty()) {
            return Err(ConfigError::Missing { field: "encryption_key" });
        }
        if self.strategy.signs() && self.signing_key.as_ref().is_none_or(|k| k.is_empty()) {
            return Err(ConfigError::Missing { field: "signing_key" });
        }
        Ok(())
    }
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("strategy", &self.strategy)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything the factory and registries need to know about one ticket type.
#[derive(Debug, Clone, bon::Builder)]
pub struct TicketDefinition {
    #[builder(into)]
    prefix: String,
    ticket_type: TicketType,
    #[builder(into)]
    storage_name: String,
    #[builder(with = |policy: impl ExpirationPolicyBuilder + 'static| Arc::new(policy) as Arc<dyn ExpirationPolicyBuilder>)]
    expiration_policy: Arc<dyn ExpirationPolicyBuilder>,
    crypto: Option<CryptoConfig>,
}

impl TicketDefinition {
    /// Id prefix, without separator.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical type.
    #[must_use]
    pub fn ticket_type(&self) -> TicketType {
        self.ticket_type
    }

    /// Storage namespace.
    #[must_use]
    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    /// Policy for a ticket minted now.
    #[must_use]
    pub fn expiration_policy(&self) -> ExpirationPolicy {
        self.expiration_policy.build()
    }

    /// Crypto settings, if the type is protected.
    #[must_use]
    pub fn crypto(&self) -> Option<&CryptoConfig> {
        self.crypto.as_ref()
    }
}

/// Immutable prefix-indexed set of ticket definitions.
#[derive(Debug, Clone)]
pub struct TicketCatalog {
    by_prefix: Arc<BTreeMap<String, TicketDefinition>>,
}

/// Collects definitions before freezing them into a [`TicketCatalog`].
#[derive(Debug, Default)]
pub struct TicketCatalogBuilder {
    definitions: Vec<TicketDefinition>,
}

impl TicketCatalogBuilder {
    /// Adds a definition.
    #[must_use]
    pub fn register(mut self, definition: TicketDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Freezes the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty or separator-bearing prefix, an
    /// empty storage name, a prefix registered twice, or crypto settings
    /// missing a required key.
    pub fn build(self) -> Result<TicketCatalog, ConfigError> {
        let mut by_prefix = BTreeMap::new();
        for definition in self.definitions {
            if definition.prefix.is_empty() || definition.prefix.contains(crate::id::SEPARATOR) {
                return Err(ConfigError::Invalid {
                    field: "prefix",
                    reason: format!("'{}' is not a valid ticket prefix", definition.prefix),
                });
            }
            if definition.storage_name.is_empty() {
                return Err(ConfigError::Missing { field: "storage_name" });
            }
            if let Some(crypto) = &definition.crypto {
                crypto.validate()?;
            }
            if by_prefix.contains_key(&definition.prefix) {
                return Err(ConfigError::Invalid {
                    field: "prefix",
                    reason: format!("'{}' is registered twice", definition.prefix),
                });
            }
            by_prefix.insert(definition.prefix.clone(), definition);
        }
        Ok(TicketCatalog { by_prefix: Arc::new(by_prefix) })
    }
}

impl TicketCatalog {
    /// Starts an empty catalog.
    #[must_use]
    pub fn builder() -> TicketCatalogBuilder {
        TicketCatalogBuilder::default()
    }

    /// Resolves a ticket id, bare prefix, or type name.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::UnknownTicketType`] when nothing matches.
    pub fn find(&self, prefix_or_id: &str) -> TicketResult<&TicketDefinition> {
        if let Some(definition) = self.by_prefix.get(prefix_of(prefix_or_id)) {
            return Ok(definition);
        }
        self.by_prefix
            .values()
            .find(|d| d.ticket_type.as_str() == prefix_or_id)
            .ok_or_else(|| TicketError::unknown_type(prefix_or_id))
    }

    /// First definition registered for a logical type, in prefix order.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::UnknownTicketType`] when the type is not registered.
    pub fn find_by_type(&self, ticket_type: TicketType) -> TicketResult<&TicketDefinition> {
        self.by_prefix
            .values()
            .find(|d| d.ticket_type == ticket_type)
            .ok_or_else(|| TicketError::unknown_type(ticket_type.as_str()))
    }

    /// All definitions, ordered by prefix.
    pub fn find_all(&self) -> impl Iterator<Item = &TicketDefinition> {
        self.by_prefix.values()
    }

    /// Whether a prefix is registered.
    #[must_use]
    pub fn contains(&self, prefix: &str) -> bool {
        self.by_prefix.contains_key(prefix)
    }

    /// Distinct storage namespaces.
    #[must_use]
    pub fn storage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_prefix.values().map(|d| d.storage_name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Builds the standard catalog (TGT, ST, PT, PGT, TST) from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn from_config(config: &TicketRegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let crypto = |prefix: &str| config.crypto.get(prefix).cloned();
        let standard = [
            (
                TICKET_GRANTING_TICKET_PREFIX,
                TicketType::TicketGranting,
                TICKET_GRANTING_TICKETS_STORAGE,
                config.ticket_granting_ticket.expiration_policy(),
            ),
            (
                SERVICE_TICKET_PREFIX,
                TicketType::Service,
                SERVICE_TICKETS_STORAGE,
                config.service_ticket.expiration_policy(),
            ),
            (
                PROXY_TICKET_PREFIX,
                TicketType::Proxy,
                PROXY_TICKETS_STORAGE,
                config.proxy_ticket.expiration_policy(),
            ),
            (
                PROXY_GRANTING_TICKET_PREFIX,
                TicketType::ProxyGranting,
                PROXY_GRANTING_TICKETS_STORAGE,
                config.proxy_granting_ticket_policy(),
            ),
            (
                TRANSIENT_SESSION_TICKET_PREFIX,
                TicketType::Transient,
                TRANSIENT_SESSION_TICKETS_STORAGE,
                config.transient_ticket.expiration_policy(),
            ),
        ];

        standard
            .into_iter()
            .fold(Self::builder(), |builder, (prefix, ticket_type, storage_name, policy)| {
                builder.register(
                    TicketDefinition::builder()
                        .prefix(prefix)
                        .ticket_type(ticket_type)
                        .storage_name(storage_name)
                        .expiration_policy(policy)
                        .maybe_crypto(crypto(prefix))
                        .build(),
                )
            })
            .build()
    }
}
