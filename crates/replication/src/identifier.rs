//! Publisher identifiers.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of one node for the lifetime of its process.
///
/// Every command a node publishes carries its identifier as the origin;
/// receivers drop commands whose origin equals their own.
///
/// ```
/// use tessera_replication::PublisherIdentifier;
///
/// let a = PublisherIdentifier::random();
/// let b = PublisherIdentifier::random();
/// assert_ne!(a, b);
/// assert_eq!(PublisherIdentifier::new("node-a").as_str(), "node-a");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublisherIdentifier(Arc<str>);

impl PublisherIdentifier {
    /// Identifier with an explicit value, for operator-assigned node names.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublisherIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PublisherIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublisherIdentifier({})", self.0)
    }
}
