//! Ticket factory.
//!
//! [`DefaultTicketFactory`] is the only way tickets come into existence. It
//! allocates an id with the catalog prefix, attaches the catalog's expiration
//! policy, links children to their granting ticket and stores everything
//! through the registry.
//!
//! Child creation reads the parent, records the child on it, and stores both
//! with [`TicketRegistry::add_child`]. A concurrent change to the parent makes
//! that call fail with a conflict, in which case the parent is re-read and the
//! step repeated, so siblings created at the same time never overwrite each
//! other's descendant entries.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    catalog::TicketCatalog,
    clock::{Clock, SystemClock},
    config::TicketRegistryConfig,
    error::{ConfigError, TicketError, TicketResult},
    id::{
        DefaultUniqueTicketIdGenerator, PROXY_GRANTING_TICKET_IOU_PREFIX, UniqueTicketIdGenerator,
    },
    registry::{DEFAULT_MODIFY_ATTEMPTS, TicketRegistry},
    ticket::{
        Authentication, GrantingTicket, Service, ServiceTicket, Ticket, TicketKind, TicketType,
        TransientTicket,
    },
};

/// A newly issued proxy-granting ticket and the IOU handed to the proxy callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyGrantingTicketIssued {
    /// The stored proxy-granting ticket.
    pub ticket: Ticket,
    /// `PGTIOU-` identifier the callback receives alongside the ticket id.
    pub iou: String,
}

/// Mints tickets and stores them through a [`TicketRegistry`].
pub struct DefaultTicketFactory {
    registry: Arc<dyn TicketRegistry>,
    catalog: TicketCatalog,
    id_generator: Arc<dyn UniqueTicketIdGenerator>,
    clock: Arc<dyn Clock>,
    only_track_most_recent_session: bool,
    max_attempts: u32,
}

impl std::fmt::Debug for DefaultTicketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTicketFactory")
            .field("id_generator", &self.id_generator)
            .field("only_track_most_recent_session", &self.only_track_most_recent_session)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl DefaultTicketFactory {
    /// Creates a factory.
    ///
    /// # Optional Fields
    ///
    /// * `id_generator` - defaults to [`DefaultUniqueTicketIdGenerator::default`]
    /// * `clock` - defaults to [`SystemClock`]
    /// * `only_track_most_recent_session` - defaults to `true`
    /// * `max_attempts` - parent re-read attempts, defaults to [`DEFAULT_MODIFY_ATTEMPTS`]
    #[builder]
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        catalog: TicketCatalog,
        id_generator: Option<Arc<dyn UniqueTicketIdGenerator>>,
        clock: Option<Arc<dyn Clock>>,
        #[builder(default = true)] only_track_most_recent_session: bool,
        #[builder(default = DEFAULT_MODIFY_ATTEMPTS)] max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            catalog,
            id_generator: id_generator
                .unwrap_or_else(|| Arc::new(DefaultUniqueTicketIdGenerator::default())),
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            only_track_most_recent_session,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Builds the catalog and id generator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn from_config(
        config: &TicketRegistryConfig,
        registry: Arc<dyn TicketRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let catalog = TicketCatalog::from_config(config)?;
        let id_generator = DefaultUniqueTicketIdGenerator::builder()
            .random_length(config.id_generator.random_length)
            .maybe_suffix(config.id_generator.suffix.clone())
            .build()?;
        Ok(Self::builder()
            .registry(registry)
            .catalog(catalog)
            .id_generator(Arc::new(id_generator) as Arc<dyn UniqueTicketIdGenerator>)
            .clock(clock)
            .only_track_most_recent_session(config.only_track_most_recent_session)
            .max_attempts(config.modify_attempts)
            .build())
    }
}

impl DefaultTicketFactory {
    /// The catalog tickets are minted from.
    #[must_use]
    pub fn catalog(&self) -> &TicketCatalog {
        &self.catalog
    }

    /// The registry tickets are stored in.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    fn mint(&self, ticket_type: TicketType, kind: TicketKind) -> TicketResult<Ticket> {
        let definition = self.catalog.find_by_type(ticket_type)?;
        let id = self.id_generator.new_ticket_id(definition.prefix());
        Ok(Ticket::new(id, self.clock.now(), definition.expiration_policy(), kind))
    }

    /// Loads a live granting ticket of one of `allowed` types.
    async fn live_parent(&self, id: &str, allowed: &[TicketType]) -> TicketResult<Ticket> {
        let parent = self.registry.get(id).await?.ok_or_else(|| {
            TicketError::invalid_state(id, "granting ticket does not exist or has expired")
        })?;
        if !allowed.contains(&parent.ticket_type()) {
            return Err(TicketError::invalid_state(
                id,
                format!("{} tickets cannot grant this ticket", parent.ticket_type()),
            ));
        }
        Ok(parent)
    }

    /// Stores `child` under `parent_id`, re-reading the parent on conflicts.
    async fn attach<F>(
        &self,
        parent_id: &str,
        allowed: &[TicketType],
        child: Ticket,
        mut link: F,
    ) -> TicketResult<Ticket>
    where
        F: FnMut(&mut Ticket, &Ticket),
    {
        let mut last_conflict = None;
        for attempt in 0..self.max_attempts {
            let mut parent = self.live_parent(parent_id, allowed).await?;
            link(&mut parent, &child);
            match self.registry.add_child(child.clone(), parent).await {
                Ok((stored, _)) => return Ok(stored),
                Err(err) if err.is_conflict() => {
                    tracing::debug!(parent_id, attempt, "parent changed concurrently, retrying");
                    last_conflict = Some(err);
                },
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| TicketError::conflict(parent_id, 0, 0)))
    }

    /// Creates and stores a ticket-granting ticket for `authentication`.
    ///
    /// # Errors
    ///
    /// Propagates catalog and registry failures.
    #[tracing::instrument(skip(self, authentication), fields(principal = %authentication.principal.id))]
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> TicketResult<Ticket> {
        let ticket = self.mint(
            TicketType::TicketGranting,
            TicketKind::TicketGranting(GrantingTicket {
                authentication,
                parent_ticket_granting_ticket_id: None,
                services: BTreeMap::new(),
                proxy_granting_tickets: BTreeMap::new(),
                proxied_by: None,
            }),
        )?;
        let stored = self.registry.add(ticket).await?;
        tracing::debug!(ticket_id = stored.id(), "ticket-granting ticket created");
        Ok(stored)
    }

    /// Creates a service ticket for `service` under a ticket-granting ticket.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the parent is absent, expired or
    /// not a ticket-granting ticket.
    #[tracing::instrument(skip(self, service), fields(service = %service.id))]
    pub async fn create_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: Service,
        credential_provided: bool,
    ) -> TicketResult<Ticket> {
        self.grant(
            ticket_granting_ticket_id,
            TicketType::TicketGranting,
            TicketType::Service,
            service,
            credential_provided,
        )
        .await
    }

    /// Creates a proxy ticket for `target_service` under a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the parent is absent, expired or
    /// not a proxy-granting ticket.
    #[tracing::instrument(skip(self, target_service), fields(service = %target_service.id))]
    pub async fn create_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        target_service: Service,
    ) -> TicketResult<Ticket> {
        self.grant(
            proxy_granting_ticket_id,
            TicketType::ProxyGranting,
            TicketType::Proxy,
            target_service,
            false,
        )
        .await
    }

    async fn grant(
        &self,
        parent_id: &str,
        parent_type: TicketType,
        child_type: TicketType,
        service: Service,
        credential_provided: bool,
    ) -> TicketResult<Ticket> {
        let fields = ServiceTicket {
            service: service.clone(),
            ticket_granting_ticket_id: parent_id.to_string(),
            credential_provided,
            consumed: false,
        };
        let kind = match child_type {
            TicketType::Proxy => TicketKind::Proxy(fields),
            _ => TicketKind::Service(fields),
        };
        let child = self.mint(child_type, kind)?;
        let now = self.clock.now();
        let only_most_recent = self.only_track_most_recent_session;

        let stored = self
            .attach(parent_id, &[parent_type], child, |parent, child| {
                parent.track_service(child.id(), &service, only_most_recent, now);
            })
            .await?;
        tracing::debug!(ticket_id = stored.id(), parent_id, "ticket granted");
        Ok(stored)
    }

    /// Issues a proxy-granting ticket to the service a service or proxy
    /// ticket was validated for.
    ///
    /// The new ticket is a child of the validated ticket's granting ticket
    /// and records that service as `proxied_by`.
    ///
    /// # Errors
    ///
    /// [`TicketError::InvalidTicketState`] if the validated ticket is absent,
    /// expired, not a service/proxy ticket, or its service may not proxy.
    #[tracing::instrument(skip(self, authentication))]
    pub async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        authentication: Authentication,
    ) -> TicketResult<ProxyGrantingTicketIssued> {
        let validated = self.registry.get(service_ticket_id).await?.ok_or_else(|| {
            TicketError::invalid_state(service_ticket_id, "ticket does not exist or has expired")
        })?;
        let Some(st) = validated.as_service_ticket() else {
            return Err(TicketError::invalid_state(
                service_ticket_id,
                format!("{} tickets cannot grant proxy-granting tickets", validated.ticket_type()),
            ));
        };
        if !st.service.proxy_allowed {
            return Err(TicketError::invalid_state(
                service_ticket_id,
                format!("service {} is not allowed to proxy", st.service.id),
            ));
        }
        let service = st.service.clone();
        let parent_id = st.ticket_granting_ticket_id.clone();

        let ticket = self.mint(
            TicketType::ProxyGranting,
            TicketKind::ProxyGranting(GrantingTicket {
                authentication,
                parent_ticket_granting_ticket_id: Some(parent_id.clone()),
                services: BTreeMap::new(),
                proxy_granting_tickets: BTreeMap::new(),
                proxied_by: Some(service.clone()),
            }),
        )?;
        let stored = self
            .attach(
                &parent_id,
                &[TicketType::TicketGranting, TicketType::ProxyGranting],
                ticket,
                |parent, pgt| parent.track_proxy_granting_ticket(pgt.id(), &service),
            )
            .await?;
        let iou = self.id_generator.new_ticket_id(PROXY_GRANTING_TICKET_IOU_PREFIX);
        tracing::debug!(ticket_id = stored.id(), parent_id, "proxy-granting ticket created");
        Ok(ProxyGrantingTicketIssued { ticket: stored, iou })
    }

    /// Creates a transient session ticket carrying `properties`.
    ///
    /// # Errors
    ///
    /// Propagates catalog and registry failures.
    #[tracing::instrument(skip(self, properties))]
    pub async fn create_transient_ticket(
        &self,
        service: Option<Service>,
        properties: BTreeMap<String, serde_json::Value>,
    ) -> TicketResult<Ticket> {
        let ticket = self.mint(
            TicketType::Transient,
            TicketKind::Transient(TransientTicket { service, properties }),
        )?;
        self.registry.add(ticket).await
    }
}
