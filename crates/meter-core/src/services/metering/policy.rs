//! Quota policy
//!
//! Pure allow/deny decisions. Nothing in here touches the store; the
//! authorizer reads the limiting counter and hands its value in as
//! `prior_usage`.
//!
//! The limit check is `prior_usage + proposed <= character_limit`, i.e. the
//! cost of the current request is included. Two requests that read the same
//! prior usage concurrently can both pass, so a key can overshoot its limit by
//! at most one request per concurrent racer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{CounterKey, Period};
use crate::models::{ApiKeyRecord, KeyStatus, KeyType};

// ============================================================================
// Decision Types
// ============================================================================

/// Why a request was refused
///
/// The `Display` strings are part of the public contract: client SDKs and
/// operators match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    KeyNotFound,
    KeyInactive,
    KeyExpired,
    QuotaExceeded,
}

impl DenyReason {
    /// Whether the caller should treat this as an authentication failure
    /// rather than a quota rejection
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, DenyReason::KeyNotFound)
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::KeyNotFound => write!(f, "key not found"),
            DenyReason::KeyInactive => write!(f, "key inactive"),
            DenyReason::KeyExpired => write!(f, "key expired"),
            DenyReason::QuotaExceeded => write!(f, "quota exceeded"),
        }
    }
}

/// Outcome of a quota decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Serve the request; `over_quota_overage` marks billed excess usage
    Allow { over_quota_overage: bool },
    Deny { reason: DenyReason },
}

impl Decision {
    const ALLOW: Decision = Decision::Allow {
        over_quota_overage: false,
    };

    fn deny(reason: DenyReason) -> Self {
        Decision::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Deny { reason } => Some(*reason),
            Decision::Allow { .. } => None,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Quota decisions for every key tier
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaPolicy;

impl QuotaPolicy {
    /// Decide whether `record` may spend `proposed` more characters now
    pub fn decide(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> Decision {
        Self::decide_at(record, prior_usage, proposed, Utc::now())
    }

    /// [`QuotaPolicy::decide`] evaluated at a fixed instant
    pub fn decide_at(
        record: &ApiKeyRecord,
        prior_usage: i64,
        proposed: i64,
        now: DateTime<Utc>,
    ) -> Decision {
        if record.status != KeyStatus::Active {
            return Decision::deny(DenyReason::KeyInactive);
        }
        if record.is_expired_at(now) {
            return Decision::deny(DenyReason::KeyExpired);
        }

        match record.key_type {
            KeyType::Trial => decide_trial(record, prior_usage, proposed),
            KeyType::PatreonSubscriber => decide_patreon(record, prior_usage, proposed),
            KeyType::MeteredSubscriber => decide_metered(record, prior_usage, proposed),
            KeyType::LifetimeGrant => decide_lifetime_grant(),
        }
    }

    /// Period of the counter that bounds a tier's `character_limit`
    pub fn limiting_period(key_type: KeyType) -> Period {
        match key_type {
            KeyType::Trial => Period::Lifetime,
            KeyType::PatreonSubscriber => Period::Monthly,
            KeyType::MeteredSubscriber => Period::RecurringCycle,
            KeyType::LifetimeGrant => Period::Lifetime,
        }
    }

    /// The plan counter whose value is `prior_usage` for `record`
    pub fn limiting_key(record: &ApiKeyRecord, at: DateTime<Utc>) -> CounterKey {
        CounterKey::plan(Self::limiting_period(record.key_type), at, &record.api_key)
    }
}

fn within_limit(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> bool {
    prior_usage.saturating_add(proposed) <= record.character_limit
}

/// Within the limit, or served as billed overage when the plan allows it
fn quota_with_overage(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> Decision {
    if within_limit(record, prior_usage, proposed) {
        Decision::ALLOW
    } else if record.overage_allowed {
        Decision::Allow {
            over_quota_overage: true,
        }
    } else {
        Decision::deny(DenyReason::QuotaExceeded)
    }
}

/// Trials are a hard cap; `overage_allowed` is never honoured
fn decide_trial(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> Decision {
    if within_limit(record, prior_usage, proposed) {
        Decision::ALLOW
    } else {
        Decision::deny(DenyReason::QuotaExceeded)
    }
}

fn decide_patreon(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> Decision {
    quota_with_overage(record, prior_usage, proposed)
}

fn decide_metered(record: &ApiKeyRecord, prior_usage: i64, proposed: i64) -> Decision {
    quota_with_overage(record, prior_usage, proposed)
}

fn decide_lifetime_grant() -> Decision {
    Decision::ALLOW
}

// ============================================================================
// Tests
// ============================================================================
