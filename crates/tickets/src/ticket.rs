//! Ticket data model.
//!
//! Every ticket is a [`Ticket`]: a shared base record (id, timestamps, usage
//! counters, expiration policy, descendant ids, storage revision) plus a
//! [`TicketKind`] discriminant carrying the type-specific fields. Registries
//! and replication treat tickets uniformly; only the factory and catalog care
//! about the concrete kind.
//!
//! Parent and child links are plain ids resolved through the registry. A
//! ticket never holds another ticket.
//!
//! Tickets are minted by [`DefaultTicketFactory`](crate::factory::DefaultTicketFactory);
//! there is no public constructor.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    expiration::{ExpirationPolicy, ExpirationReason, TicketState},
    id::prefix_of,
};

/// Authentication attribute that marks a remember-me login.
pub const REMEMBER_ME_ATTRIBUTE: &str = "longTermAuthenticationRequestTokenUsed";

/// Multi-valued attribute map.
pub type Attributes = BTreeMap<String, Vec<serde_json::Value>>;

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (usually a username).
    pub id: String,
    /// Released principal attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    /// Principal with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: Attributes::new() }
    }
}

/// Result of a successful login, opaque to the ticket layer apart from the
/// principal id and the remember-me flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct Authentication {
    /// Who authenticated.
    pub principal: Principal,
    /// When the authentication happened.
    #[builder(default = Utc::now())]
    pub authentication_date: DateTime<Utc>,
    /// Authentication-level attributes (method, remember-me, ...).
    #[serde(default)]
    #[builder(default)]
    pub attributes: Attributes,
    /// Identifiers of the credentials that were presented.
    #[serde(default)]
    #[builder(default)]
    pub credentials: Vec<String>,
}

impl Authentication {
    /// Whether the login asked for a long-term session.
    #[must_use]
    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(REMEMBER_ME_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| v.as_bool() == Some(true)))
    }
}

/// Target application a service or proxy ticket is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier, usually the application URL.
    pub id: String,
    /// Whether the service may obtain proxy-granting tickets.
    #[serde(default)]
    pub proxy_allowed: bool,
}

impl Service {
    /// A service that may not proxy.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), proxy_allowed: false }
    }

    /// A service allowed to request proxy-granting tickets.
    #[must_use]
    pub fn proxying(id: impl Into<String>) -> Self {
        Self { id: id.into(), proxy_allowed: true }
    }

    /// Compares service identifiers.
    #[must_use]
    pub fn matches(&self, other: &Service) -> bool {
        self.id == other.id
    }
}

/// Logical ticket types known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Root of an SSO session.
    TicketGranting,
    /// Granting ticket issued to a proxying service.
    ProxyGranting,
    /// Single-application ticket granted by a TGT.
    Service,
    /// Single-application ticket granted by a PGT.
    Proxy,
    /// Short-lived key/value payload.
    Transient,
}

impl TicketType {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TicketGranting => "ticket_granting",
            Self::ProxyGranting => "proxy_granting",
            Self::Service => "service",
            Self::Proxy => "proxy",
            Self::Transient => "transient",
        }
    }

    /// Whether tickets of this type can grant children.
    #[must_use]
    pub fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of ticket-granting and proxy-granting tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantingTicket {
    /// The login this session stands for.
    pub authentication: Authentication,
    /// Granting ticket this one was derived from, for proxy chains.
    #[serde(default)]
    pub parent_ticket_granting_ticket_id: Option<String>,
    /// Services granted tickets from this session, keyed by ticket id.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Proxy-granting tickets issued under this session, keyed by ticket id.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeMap<String, Service>,
    /// For proxy-granting tickets, the service that is proxying.
    #[serde(default)]
    pub proxied_by: Option<Service>,
}

/// Fields of service and proxy tickets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTicket {
    /// Application the ticket was issued for.
    pub service: Service,
    /// Owning granting ticket.
    pub ticket_granting_ticket_id: String,
    /// Whether the user presented credentials for this ticket ("renew").
    pub credential_provided: bool,
    /// Single-use guard.
    #[serde(default)]
    pub consumed: bool,
}

/// Fields of transient session tickets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransientTicket {
    /// Optional service the payload belongs to.
    #[serde(default)]
    pub service: Option<Service>,
    /// Stashed protocol context.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Type-specific part of a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TicketKind {
    /// Ticket-granting ticket.
    TicketGranting(GrantingTicket),
    /// Proxy-granting ticket.
    ProxyGranting(GrantingTicket),
    /// Service ticket.
    Service(ServiceTicket),
    /// Proxy ticket.
    Proxy(ServiceTicket),
    /// Transient session ticket.
    Transient(TransientTicket),
}

/// A ticket: base lifecycle record plus its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    #[serde(default)]
    previous_time_used: Option<DateTime<Utc>>,
    #[serde(default)]
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
    #[serde(default)]
    descendant_ticket_ids: BTreeSet<String>,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    revision: u64,
    kind: TicketKind,
}

impl Ticket {
    pub(crate) fn new(
        id: String,
        creation_time: DateTime<Utc>,
        expiration_policy: ExpirationPolicy,
        kind: TicketKind,
    ) -> Self {
        Self {
            id,
            creation_time,
            last_time_used: creation_time,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            descendant_ticket_ids: BTreeSet::new(),
            expired: false,
            revision: 0,
            kind,
        }
    }

    /// Ticket id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Prefix segment of the id.
    #[must_use]
    pub fn prefix(&self) -> &str {
        prefix_of(&self.id)
    }

    /// Issue instant.
    #[must_use]
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// Most recent use.
    #[must_use]
    pub fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    /// The use before the most recent one.
    #[must_use]
    pub fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    /// Successful uses so far.
    #[must_use]
    pub fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    /// The policy fixed at creation.
    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Ids of tickets derived from this one.
    #[must_use]
    pub fn descendant_ticket_ids(&self) -> &BTreeSet<String> {
        &self.descendant_ticket_ids
    }

    /// Storage revision. Zero until first stored.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Sets the storage revision. Registries call this on every write.
    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    /// Type-specific fields.
    #[must_use]
    pub fn kind(&self) -> &TicketKind {
        &self.kind
    }

    /// Logical type.
    #[must_use]
    pub fn ticket_type(&self) -> TicketType {
        match &self.kind {
            TicketKind::TicketGranting(_) => TicketType::TicketGranting,
            TicketKind::ProxyGranting(_) => TicketType::ProxyGranting,
            TicketKind::Service(_) => TicketType::Service,
            TicketKind::Proxy(_) => TicketType::Proxy,
            TicketKind::Transient(_) => TicketType::Transient,
        }
    }

    /// Granting fields for TGTs and PGTs.
    #[must_use]
    pub fn as_granting(&self) -> Option<&GrantingTicket> {
        match &self.kind {
            TicketKind::TicketGranting(g) | TicketKind::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    /// Service fields for STs and PTs.
    #[must_use]
    pub fn as_service_ticket(&self) -> Option<&ServiceTicket> {
        match &self.kind {
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(s),
            _ => None,
        }
    }

    /// Transient fields.
    #[must_use]
    pub fn as_transient(&self) -> Option<&TransientTicket> {
        match &self.kind {
            TicketKind::Transient(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.kind {
            TicketKind::TicketGranting(g) | TicketKind::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn service_ticket_mut(&mut self) -> Option<&mut ServiceTicket> {
        match &mut self.kind {
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(s),
            _ => None,
        }
    }

    /// The granting ticket this one hangs off, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match &self.kind {
            TicketKind::TicketGranting(g) | TicketKind::ProxyGranting(g) => {
                g.parent_ticket_granting_ticket_id.as_deref()
            },
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(&s.ticket_granting_ticket_id),
            TicketKind::Transient(_) => None,
        }
    }

    /// Authentication of granting tickets.
    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.as_granting().map(|g| &g.authentication)
    }

    /// Principal id of granting tickets.
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        self.authentication().map(|a| a.principal.id.as_str())
    }

    /// Service of service, proxy and service-bound transient tickets.
    #[must_use]
    pub fn service(&self) -> Option<&Service> {
        match &self.kind {
            TicketKind::Service(s) | TicketKind::Proxy(s) => Some(&s.service),
            TicketKind::Transient(t) => t.service.as_ref(),
            _ => None,
        }
    }

    /// Usage snapshot for policy evaluation.
    #[must_use]
    pub fn state(&self) -> TicketState {
        TicketState {
            creation_time: self.creation_time,
            last_time_used: self.last_time_used,
            previous_time_used: self.previous_time_used,
            count_of_uses: self.count_of_uses,
            remember_me: self.authentication().is_some_and(Authentication::is_remember_me),
        }
    }

    /// Why the ticket is expired at `now`, if it is.
    ///
    /// Explicit revocation wins over every policy.
    #[must_use]
    pub fn expiration(&self, now: DateTime<Utc>) -> Option<ExpirationReason> {
        if self.expired {
            return Some(ExpirationReason::Revoked);
        }
        self.expiration_policy.expiration(&self.state(), now)
    }

    /// Whether the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration(now).is_some()
    }

    /// Whether a service ticket has already been consumed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.as_service_ticket().is_some_and(|s| s.consumed)
    }

    /// Records a successful use at `now`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Revokes the ticket regardless of its policy.
    pub fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// Records a child id. Returns `false` if it was already present.
    pub fn add_descendant(&mut self, child_id: impl Into<String>) -> bool {
        self.descendant_ticket_ids.insert(child_id.into())
    }

    /// Marks a service or proxy ticket consumed and records the use.
    ///
    /// Returns `false` for other kinds or when it was already consumed.
    pub fn consume(&mut self, now: DateTime<Utc>) -> bool {
        let Some(st) = self.service_ticket_mut() else {
            return false;
        };
        if st.consumed {
            return false;
        }
        st.consumed = true;
        self.mark_used(now);
        true
    }

    /// Tracks a service ticket granted from this granting ticket.
    ///
    /// With `only_track_most_recent_session`, earlier tickets for the same
    /// service are dropped from the tracked services (they stay descendants
    /// and are still revoked on logout). Also counts as a use of the
    /// granting ticket.
    pub(crate) fn track_service(
        &mut self,
        ticket_id: &str,
        service: &Service,
        only_track_most_recent_session: bool,
        now: DateTime<Utc>,
    ) {
        if let Some(granting) = self.granting_mut() {
            if only_track_most_recent_session {
                granting.services.retain(|_, tracked| !tracked.matches(service));
            }
            granting.services.insert(ticket_id.to_string(), service.clone());
        }
        self.add_descendant(ticket_id);
        self.mark_used(now);
    }

    /// Tracks a proxy-granting ticket issued under this granting ticket.
    pub(crate) fn track_proxy_granting_ticket(&mut self, pgt_id: &str, service: &Service) {
        if let Some(granting) = self.granting_mut() {
            granting.proxy_granting_tickets.insert(pgt_id.to_string(), service.clone());
        }
        self.add_descendant(pgt_id);
    }

    /// Folds another copy of the same ticket into this one.
    ///
    /// Grow-only state is joined: descendants, tracked services and
    /// proxy-granting tickets are unioned; usage timestamps and counts take
    /// the maximum; the consumed and revoked flags stick once set. The join
    /// is commutative, so nodes that exchange their copies in any order end
    /// up with the same ticket. Transient properties follow the higher
    /// revision. The revision itself is left to the caller.
    ///
    /// Returns whether anything changed.
    pub fn absorb(&mut self, other: &Ticket) -> bool {
        let before = self.clone();

        self.last_time_used = self.last_time_used.max(other.last_time_used);
        self.previous_time_used = self.previous_time_used.max(other.previous_time_used);
        self.count_of_uses = self.count_of_uses.max(other.count_of_uses);
        self.expired |= other.expired;
        self.descendant_ticket_ids.extend(other.descendant_ticket_ids.iter().cloned());

        match (&mut self.kind, &other.kind) {
            (TicketKind::TicketGranting(mine), TicketKind::TicketGranting(theirs))
            | (TicketKind::ProxyGranting(mine), TicketKind::ProxyGranting(theirs)) => {
                for (id, service) in &theirs.services {
                    mine.services.entry(id.clone()).or_insert_with(|| service.clone());
                }
                for (id, service) in &theirs.proxy_granting_tickets {
                    mine.proxy_granting_tickets.entry(id.clone()).or_insert_with(|| service.clone());
                }
            },
            (TicketKind::Service(mine), TicketKind::Service(theirs))
            | (TicketKind::Proxy(mine), TicketKind::Proxy(theirs)) => {
                mine.consumed |= theirs.consumed;
            },
            (TicketKind::Transient(mine), TicketKind::Transient(theirs))
                if other.revision > before.revision =>
            {
                mine.properties.clone_from(&theirs.properties);
            },
            _ => {},
        }

        *self != before
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 4, 10, 0, 0).unwrap()
    }

    fn authentication(remember_me: bool) -> Authentication {
        let mut attributes = Attributes::new();
        if remember_me {
            attributes.insert(REMEMBER_ME_ATTRIBUTE.into(), vec![serde_json::Value::Bool(true)]);
        }
        Authentication::builder()
            .principal(Principal::new("casuser"))
            .authentication_date(now())
            .attributes(attributes)
            .build()
    }

    fn tgt(remember_me: bool) -> Ticket {
        Ticket::new(
            "TGT-1-abc".into(),
            now(),
            ExpirationPolicy::NeverExpires,
            TicketKind::TicketGranting(GrantingTicket {
                authentication: authentication(remember_me),
                parent_ticket_granting_ticket_id: None,
                services: BTreeMap::new(),
                proxy_granting_tickets: BTreeMap::new(),
                proxied_by: None,
            }),
        )
    }

    fn st(policy: ExpirationPolicy) -> Ticket {
        Ticket::new(
            "ST-2-def".into(),
            now(),
            policy,
            TicketKind::Service(ServiceTicket {
                service: Service::new("https://app.example.org"),
                ticket_granting_ticket_id: "TGT-1-abc".into(),
                credential_provided: false,
                consumed: false,
            }),
        )
    }

    #[test]
    fn mark_used_shifts_timestamps() {
        let mut ticket = st(ExpirationPolicy::NeverExpires);
        let later = now() + chrono::Duration::seconds(3);
        ticket.mark_used(later);
        assert_eq!(ticket.count_of_uses(), 1);
        assert_eq!(ticket.last_time_used(), later);
        assert_eq!(ticket.previous_time_used(), Some(now()));
        assert_eq!(ticket.creation_time(), now());
    }

    #[test]
    fn consume_is_single_shot() {
        let mut ticket = st(ExpirationPolicy::usage_count(1));
        assert!(!ticket.is_expired(now()));
        assert!(ticket.consume(now()));
        assert!(ticket.is_consumed());
        assert!(!ticket.consume(now()));
        assert_eq!(ticket.expiration(now()), Some(ExpirationReason::UsageExceeded));
    }

    #[test]
    fn revocation_overrides_policy() {
        let mut ticket = tgt(false);
        assert!(!ticket.is_expired(now()));
        ticket.mark_expired();
        assert_eq!(ticket.expiration(now()), Some(ExpirationReason::Revoked));
    }

    #[test]
    fn remember_me_flag_reaches_policy_state() {
        assert!(tgt(true).state().remember_me);
        assert!(!tgt(false).state().remember_me);
        assert!(!st(ExpirationPolicy::NeverExpires).state().remember_me);
    }

    #[test]
    fn track_service_honours_most_recent_session() {
        let mut ticket = tgt(false);
        let app = Service::new("https://app.example.org");
        ticket.track_service("ST-1", &app, true, now());
        ticket.track_service("ST-2", &app, true, now());
        let granting = ticket.as_granting().unwrap();
        assert_eq!(granting.services.len(), 1);
        assert!(granting.services.contains_key("ST-2"));
        assert_eq!(ticket.descendant_ticket_ids().len(), 2);
        assert_eq!(ticket.count_of_uses(), 2);

        ticket.track_service("ST-3", &app, false, now());
        assert_eq!(ticket.as_granting().unwrap().services.len(), 2);
    }

    #[test]
    fn accessors_follow_kind() {
        let ticket = st(ExpirationPolicy::NeverExpires);
        assert_eq!(ticket.ticket_type(), TicketType::Service);
        assert_eq!(ticket.prefix(), "ST");
        assert_eq!(ticket.parent_id(), Some("TGT-1-abc"));
        assert!(ticket.authentication().is_none());
        assert_eq!(ticket.service().map(|s| s.id.as_str()), Some("https://app.example.org"));

        let root = tgt(false);
        assert_eq!(root.principal_id(), Some("casuser"));
        assert!(root.parent_id().is_none());
        assert!(root.ticket_type().is_granting());
    }

    #[test]
    fn json_shape_is_stable() {
        let mut ticket = st(ExpirationPolicy::hard_timeout(Duration::from_secs(10)));
        ticket.set_revision(7);
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["kind"]["type"], "service");
        assert_eq!(json["expiration_policy"]["type"], "hard_timeout");
        assert_eq!(json["revision"], 7);
        let back: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(back, ticket);
    }

    #[test]
    fn concurrent_grants_join_in_either_order() {
        let service = Service::new("https://app.example.org");
        let mut on_a = tgt(false);
        on_a.track_service("ST-1-a", &service, false, now());
        on_a.set_revision(2);
        let mut on_b = tgt(false);
        on_b.track_service("ST-2-b", &service, false, now() + chrono::Duration::seconds(1));
        on_b.set_revision(2);

        let mut a_then_b = on_a.clone();
        assert!(a_then_b.absorb(&on_b));
        let mut b_then_a = on_b.clone();
        assert!(b_then_a.absorb(&on_a));

        assert_eq!(a_then_b, b_then_a);
        assert_eq!(a_then_b.descendant_ticket_ids().len(), 2);
        assert_eq!(a_then_b.as_granting().unwrap().services.len(), 2);
        assert_eq!(a_then_b.last_time_used(), now() + chrono::Duration::seconds(1));
        assert!(!a_then_b.absorb(&on_b), "absorbing twice changes nothing");
    }

    #[test]
    fn absorbing_an_older_copy_never_unconsumes() {
        let original = st(ExpirationPolicy::usage_count(1));
        let mut consumed = original.clone();
        assert!(consumed.consume(now()));

        assert!(!consumed.absorb(&original));
        assert!(consumed.is_consumed());
        assert_eq!(consumed.count_of_uses(), 1);
    }
}
