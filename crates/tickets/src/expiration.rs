//! Expiration policies.
//!
//! An [`ExpirationPolicy`] is a plain value stored inside each ticket. Given a
//! snapshot of the ticket's usage ([`TicketState`]) and the current instant, it
//! decides whether the ticket is expired and, if so, why.
//!
//! # Variants
//!
//! | Policy | Expired when |
//! |--------|--------------|
//! | `NeverExpires` | never |
//! | `AlwaysExpires` | always |
//! | `HardTimeout` | `now > creation + max_time_to_live` |
//! | `Timeout` | `now > last_used + time_to_kill` |
//! | `UsageCount` | `uses >= max_uses` |
//! | `MultiTimeUseOrTimeout` | `uses >= number_of_uses` or `now > creation + time_to_kill` |
//! | `TicketGrantingTicket` | hard timeout from creation or idle timeout from last use |
//! | `ThrottledUseAndTimeout` | idle timeout, or used again within `time_in_between_uses` |
//! | `RememberMe` | delegates on the authentication's remember-me flag |
//! | `Composite` | any member is expired |
//!
//! When several conditions hold at once the hard timeout is reported first,
//! since it cannot be recovered from by using the ticket.
//!
//! All comparisons are in UTC. Durations too large to add to a timestamp are
//! treated as unbounded.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage snapshot an expiration policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketState {
    /// When the ticket was issued.
    pub creation_time: DateTime<Utc>,
    /// Most recent successful use (equals `creation_time` before first use).
    pub last_time_used: DateTime<Utc>,
    /// The use before `last_time_used`, if any.
    pub previous_time_used: Option<DateTime<Utc>>,
    /// Number of successful uses.
    pub count_of_uses: u32,
    /// Whether the owning authentication asked to be remembered.
    pub remember_me: bool,
}

impl TicketState {
    /// State of a ticket created at `at` and never used.
    #[must_use]
    pub fn fresh(at: DateTime<Utc>) -> Self {
        Self {
            creation_time: at,
            last_time_used: at,
            previous_time_used: None,
            count_of_uses: 0,
            remember_me: false,
        }
    }
}

/// Why a ticket is expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationReason {
    /// The absolute lifetime elapsed.
    HardTimeout,
    /// The ticket sat unused for too long.
    IdleTimeout,
    /// The ticket was used the maximum number of times.
    UsageExceeded,
    /// The ticket was used again too quickly.
    Throttled,
    /// The policy expires every ticket.
    AlwaysExpires,
    /// The ticket was explicitly revoked.
    Revoked,
}

impl ExpirationReason {
    fn precedence(self) -> u8 {
        match self {
            Self::Revoked => 0,
            Self::HardTimeout => 1,
            Self::AlwaysExpires => 2,
            Self::IdleTimeout => 3,
            Self::UsageExceeded => 4,
            Self::Throttled => 5,
        }
    }
}

/// Decides when a ticket stops being valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Tickets never expire.
    #[default]
    NeverExpires,
    /// Tickets are expired from birth.
    AlwaysExpires,
    /// Absolute lifetime from creation.
    HardTimeout {
        /// Maximum lifetime.
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
    },
    /// Sliding idle window from the last use.
    Timeout {
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Bounded number of uses.
    UsageCount {
        /// Uses after which the ticket is spent.
        max_uses: u32,
    },
    /// Bounded uses or lifetime from creation, whichever comes first.
    MultiTimeUseOrTimeout {
        /// Uses after which the ticket is spent.
        number_of_uses: u32,
        /// Maximum lifetime.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Absolute lifetime plus a sliding idle window.
    TicketGrantingTicket {
        /// Maximum lifetime.
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },
    /// Sliding idle window plus a minimum gap between uses.
    ThrottledUseAndTimeout {
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
        /// Minimum time between two uses.
        #[serde(with = "humantime_serde")]
        time_in_between_uses: Duration,
    },
    /// Picks a policy based on the remember-me flag.
    RememberMe {
        /// Applied when the authentication asked to be remembered.
        remember_me: Box<ExpirationPolicy>,
        /// Applied otherwise.
        default: Box<ExpirationPolicy>,
    },
    /// Expired when any member is expired.
    Composite {
        /// Member policies.
        policies: Vec<ExpirationPolicy>,
    },
}

fn elapsed_beyond(from: DateTime<Utc>, limit: Duration, now: DateTime<Utc>) -> bool {
    let Ok(limit) = chrono::Duration::from_std(limit) else {
        return false;
    };
    match from.checked_add_signed(limit) {
        Some(deadline) => now > deadline,
        None => false,
    }
}

impl ExpirationPolicy {
    /// Hard timeout of `max_time_to_live`.
    #[must_use]
    pub fn hard_timeout(max_time_to_live: Duration) -> Self {
        Self::HardTimeout { max_time_to_live }
    }

    /// Idle timeout of `time_to_kill`.
    #[must_use]
    pub fn timeout(time_to_kill: Duration) -> Self {
        Self::Timeout { time_to_kill }
    }

    /// Single- or multi-use limit.
    #[must_use]
    pub fn usage_count(max_uses: u32) -> Self {
        Self::UsageCount { max_uses }
    }

    /// Logical OR of `policies`.
    #[must_use]
    pub fn any_of(policies: impl IntoIterator<Item = ExpirationPolicy>) -> Self {
        Self::Composite { policies: policies.into_iter().collect() }
    }

    /// Returns why the ticket is expired, or `None` while it is still valid.
    #[must_use]
    pub fn expiration(&self, state: &TicketState, now: DateTime<Utc>) -> Option<ExpirationReason> {
        match self {
            Self::NeverExpires => None,
            Self::AlwaysExpires => Some(ExpirationReason::AlwaysExpires),
            Self::HardTimeout { max_time_to_live } => {
                elapsed_beyond(state.creation_time, *max_time_to_live, now)
                    .then_some(ExpirationReason::HardTimeout)
            },
            Self::Timeout { time_to_kill } => elapsed_beyond(state.last_time_used, *time_to_kill, now)
                .then_some(ExpirationReason::IdleTimeout),
            Self::UsageCount { max_uses } => {
                (state.count_of_uses >= *max_uses).then_some(ExpirationReason::UsageExceeded)
            },
            Self::MultiTimeUseOrTimeout { number_of_uses, time_to_kill } => {
                if elapsed_beyond(state.creation_time, *time_to_kill, now) {
                    Some(ExpirationReason::HardTimeout)
                } else if state.count_of_uses >= *number_of_uses {
                    Some(ExpirationReason::UsageExceeded)
                } else {
                    None
                }
            },
            Self::TicketGrantingTicket { max_time_to_live, time_to_kill } => {
                if elapsed_beyond(state.creation_time, *max_time_to_live, now) {
                    Some(ExpirationReason::HardTimeout)
                } else if elapsed_beyond(state.last_time_used, *time_to_kill, now) {
                    Some(ExpirationReason::IdleTimeout)
                } else {
                    None
                }
            },
            Self::ThrottledUseAndTimeout { time_to_kill, time_in_between_uses } => {
                if elapsed_beyond(state.last_time_used, *time_to_kill, now) {
                    return Some(ExpirationReason::IdleTimeout);
                }
                let throttled = state.count_of_uses > 0
                    && !time_in_between_uses.is_zero()
                    && !elapsed_beyond(state.last_time_used, *time_in_between_uses, now);
                throttled.then_some(ExpirationReason::Throttled)
            },
            Self::RememberMe { remember_me, default } => {
                if state.remember_me {
                    remember_me.expiration(state, now)
                } else {
                    default.expiration(state, now)
                }
            },
            Self::Composite { policies } => policies
                .iter()
                .filter_map(|policy| policy.expiration(state, now))
                .min_by_key(|reason| reason.precedence()),
        }
    }

    /// Returns `true` when [`expiration`](Self::expiration) reports a reason.
    #[must_use]
    pub fn is_expired(&self, state: &TicketState, now: DateTime<Utc>) -> bool {
        self.expiration(state, now).is_some()
    }

    /// Absolute lifetime bound, `None` when unbounded.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        match self {
            Self::NeverExpires | Self::UsageCount { .. } | Self::Timeout { .. } => None,
            Self::ThrottledUseAndTimeout { .. } => None,
            Self::AlwaysExpires => Some(Duration::ZERO),
            Self::HardTimeout { max_time_to_live }
            | Self::TicketGrantingTicket { max_time_to_live, .. } => Some(*max_time_to_live),
            Self::MultiTimeUseOrTimeout { time_to_kill, .. } => Some(*time_to_kill),
            Self::RememberMe { default, .. } => default.time_to_live(),
            Self::Composite { policies } => {
                policies.iter().filter_map(ExpirationPolicy::time_to_live).min()
            },
        }
    }

    /// Idle bound, `None` when the policy has no sliding window.
    #[must_use]
    pub fn time_to_idle(&self) -> Option<Duration> {
        match self {
            Self::NeverExpires
            | Self::UsageCount { .. }
            | Self::HardTimeout { .. }
            | Self::MultiTimeUseOrTimeout { .. } => None,
            Self::AlwaysExpires => Some(Duration::ZERO),
            Self::Timeout { time_to_kill }
            | Self::TicketGrantingTicket { time_to_kill, .. }
            | Self::ThrottledUseAndTimeout { time_to_kill, .. } => Some(*time_to_kill),
            Self::RememberMe { default, .. } => default.time_to_idle(),
            Self::Composite { policies } => {
                policies.iter().filter_map(ExpirationPolicy::time_to_idle).min()
            },
        }
    }
}
