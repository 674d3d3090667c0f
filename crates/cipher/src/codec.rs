//! Catalog-driven ticket codec.
//!
//! [`CipherTicketCodec`] serializes tickets as JSON and protects the bytes
//! with the [`CipherExecutor`] configured for the ticket's type. Types
//! without crypto settings are stored as plain JSON. Every payload is
//! framed as:
//!
//! ```text
//! ┌──────────┬────────────────┬─────────────────────────────┐
//! │ len (u8) │ prefix (utf-8) │ body (plain or protected)   │
//! └──────────┴────────────────┴─────────────────────────────┘
//! ```
//!
//! The prefix routes decoding to the right executor and is bound to the
//! protected body as associated data, so a payload cannot be replayed as
//! another ticket type.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use tessera_tickets::{
    Ticket, TicketCatalog, TicketCodec, TicketError, TicketResult, codec::digest_ticket_id,
};

use crate::{error::CipherError, executor::CipherExecutor};

/// Signing/encrypting [`TicketCodec`].
///
/// ```
/// use tessera_cipher::CipherTicketCodec;
/// use tessera_tickets::{TicketCatalog, TicketCodec, TicketRegistryConfig};
///
/// let catalog = TicketCatalog::from_config(&TicketRegistryConfig::default()).unwrap();
/// let codec = CipherTicketCodec::new(catalog).unwrap();
/// // No crypto configured: ids are stored as-is.
/// assert_eq!(codec.storage_key("ST-1-abc"), "ST-1-abc");
/// ```
#[derive(Clone)]
pub struct CipherTicketCodec {
    catalog: TicketCatalog,
    executors: Arc<HashMap<String, CipherExecutor>>,
}

impl CipherTicketCodec {
    /// Builds one executor per catalog entry that carries crypto settings.
    ///
    /// # Errors
    ///
    /// [`CipherError::InvalidKey`] or [`CipherError::MissingKey`] when an
    /// entry's keys cannot be used.
    pub fn new(catalog: TicketCatalog) -> Result<Self, CipherError> {
        let mut executors = HashMap::new();
        for definition in catalog.find_all() {
            if let Some(crypto) = definition.crypto() {
                executors
                    .insert(definition.prefix().to_string(), CipherExecutor::from_config(crypto)?);
            }
        }
        tracing::debug!(protected = executors.len(), "cipher ticket codec initialised");
        Ok(Self { catalog, executors: Arc::new(executors) })
    }

    /// Whether tickets with `prefix` are signed or encrypted.
    #[must_use]
    pub fn protects(&self, prefix: &str) -> bool {
        self.executors.contains_key(prefix)
    }
}

impl fmt::Debug for CipherTicketCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protected: Vec<_> = self.executors.keys().map(String::as_str).collect();
        protected.sort_unstable();
        f.debug_struct("CipherTicketCodec").field("protected", &protected).finish_non_exhaustive()
    }
}

impl TicketCodec for CipherTicketCodec {
    fn encode(&self, ticket: &Ticket) -> TicketResult<Bytes> {
        let prefix = ticket.prefix();
        self.catalog.find(prefix)?;
        let len = u8::try_from(prefix.len())
            .map_err(|_| TicketError::serialization(format!("prefix '{prefix}' is too long")))?;

        let plain = serde_json::to_vec(ticket)?;
        let body = match self.executors.get(prefix) {
            Some(executor) => executor.encode(&plain, prefix.as_bytes())?,
            None => plain,
        };

        let mut framed = Vec::with_capacity(1 + prefix.len() + body.len());
        framed.push(len);
        framed.extend_from_slice(prefix.as_bytes());
        framed.extend_from_slice(&body);
        Ok(Bytes::from(framed))
    }

    fn decode(&self, bytes: &[u8]) -> TicketResult<Ticket> {
        let (prefix, body) = unframe(bytes)?;
        self.catalog.find(prefix)?;

        let ticket: Ticket = match self.executors.get(prefix) {
            Some(executor) => {
                let plain = executor.decode(body, prefix.as_bytes())?;
                serde_json::from_slice(&plain)?
            },
            None => serde_json::from_slice(body).map_err(|e| {
                TicketError::invalid_cipher_text_with_source("unprotected payload is not a ticket", e)
            })?,
        };
        if ticket.prefix() != prefix {
            return Err(TicketError::invalid_cipher_text(format!(
                "payload framed as {prefix} holds {}",
                ticket.id()
            )));
        }
        Ok(ticket)
    }

    fn storage_key(&self, id: &str) -> String {
        match self.catalog.find(id) {
            Ok(definition) if self.protects(definition.prefix()) => digest_ticket_id(id),
            _ => id.to_string(),
        }
    }
}

fn unframe(bytes: &[u8]) -> TicketResult<(&str, &[u8])> {
    let Some((&len, rest)) = bytes.split_first() else {
        return Err(TicketError::invalid_cipher_text("empty payload"));
    };
    let len = usize::from(len);
    if rest.len() < len {
        return Err(TicketError::invalid_cipher_text("payload shorter than its prefix"));
    }
    let (prefix, body) = rest.split_at(len);
    let prefix = std::str::from_utf8(prefix)
        .map_err(|e| TicketError::invalid_cipher_text_with_source("prefix is not utf-8", e))?;
    Ok((prefix, body))
}
