//! Ticket error types and result alias.
//!
//! Every fallible ticket operation returns [`TicketResult`]. Registry
//! implementations, codecs and the replication layer all map their internal
//! failures onto [`TicketError`] so callers see one taxonomy.
//!
//! # Error Types
//!
//! - [`TicketError::UnknownTicketType`] - No catalog definition matches a prefix or type
//! - [`TicketError::DuplicateTicket`] - A ticket with the same id is already stored
//! - [`TicketError::InvalidTicketState`] - The ticket is expired, consumed, absent, or of the
//!   wrong type for the requested operation
//! - [`TicketError::InvalidCipherText`] - A payload failed signature or decryption checks
//! - [`TicketError::RegistryUnavailable`] - The backing store timed out or is unreachable
//! - [`TicketError::Conflict`] - An optimistic revision check failed
//! - [`TicketError::Serialization`] - A ticket could not be encoded or decoded
//! - [`TicketError::Internal`] - Anything else
//!
//! # Example
//!
//! ```
//! use tessera_tickets::{TicketError, TicketResult};
//!
//! fn lookup(id: &str) -> TicketResult<()> {
//!     Err(TicketError::invalid_state(id, "ticket does not exist"))
//! }
//!
//! assert!(!lookup("ST-1-abc").unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ticket operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Errors that can occur while creating, storing or decoding tickets.
///
/// Catalog and validation failures ([`UnknownTicketType`](Self::UnknownTicketType),
/// [`InvalidTicketState`](Self::InvalidTicketState)) are deterministic and
/// should be translated into a denial by the caller. Only
/// [`RegistryUnavailable`](Self::RegistryUnavailable) is worth retrying.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TicketError {
    /// No ticket definition is registered for the given prefix or type name.
    #[error("Unknown ticket type: {name}")]
    UnknownTicketType {
        /// The prefix, id or type name that failed to resolve.
        name: String,
    },

    /// A ticket with the same id already exists in the registry.
    #[error("Duplicate ticket: {id}")]
    DuplicateTicket {
        /// The colliding ticket id.
        id: String,
    },

    /// The operation is not valid for the ticket in its current state.
    #[error("Invalid ticket state for {id}: {reason}")]
    InvalidTicketState {
        /// The ticket the operation targeted.
        id: String,
        /// Why the ticket was rejected.
        reason: String,
    },

    /// A payload failed integrity or decryption checks.
    #[error("Invalid cipher text: {message}")]
    InvalidCipherText {
        /// Description of the failure.
        message: String,
        /// The underlying cryptographic error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The backing store did not answer in time or could not be reached.
    #[error("Ticket registry unavailable: {message}")]
    RegistryUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying transport error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// An optimistic revision check failed because the ticket changed concurrently.
    #[error("Revision conflict for {id}: expected {expected}, found {actual}")]
    Conflict {
        /// The ticket that was modified concurrently.
        id: String,
        /// The revision the writer based its change on.
        expected: u64,
        /// The revision currently stored (0 when the ticket is gone).
        actual: u64,
    },

    /// A ticket could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for failures that fit no other category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl TicketError {
    /// Creates a new `UnknownTicketType` error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownTicketType { name: name.into() }
    }

    /// Creates a new `DuplicateTicket` error.
    #[must_use]
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::DuplicateTicket { id: id.into() }
    }

    /// Creates a new `InvalidTicketState` error.
    #[must_use]
    pub fn invalid_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTicketState { id: id.into(), reason: reason.into() }
    }

    /// Creates a new `InvalidCipherText` error with the given message.
    #[must_use]
    pub fn invalid_cipher_text(message: impl Into<String>) -> Self {
        Self::InvalidCipherText { message: message.into(), source: None }
    }

    /// Creates a new `InvalidCipherText` error with a message and source error.
    #[must_use]
    pub fn invalid_cipher_text_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidCipherText { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `RegistryUnavailable` error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::RegistryUnavailable { message: message.into(), source: None }
    }

    /// Creates a new `RegistryUnavailable` error with a message and source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RegistryUnavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(id: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::Conflict { id: id.into(), expected, actual }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when retrying the same call may succeed.
    ///
    /// Only [`RegistryUnavailable`](Self::RegistryUnavailable) qualifies.
    /// Conflicts are resolved by re-reading, not by blind retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable { .. })
    }

    /// Returns `true` for an optimistic revision conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for TicketError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON encoding failed", err)
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The smallest accepted value.
        min: String,
        /// The value that was supplied.
        value: String,
    },

    /// A required field was not supplied.
    #[error("{field} is required")]
    Missing {
        /// The missing field.
        field: &'static str,
    },

    /// A field has a value that cannot be used.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<ConfigError> for TicketError {
    fn from(err: ConfigError) -> Self {
        Self::internal_with_source("invalid configuration", err)
    }
}
