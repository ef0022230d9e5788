//! Metering types
//!
//! Counter scopes, accounting periods, request types and the composite key
//! that identifies one usage counter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{parse_counter, StoreError};

// ============================================================================
// Scope
// ============================================================================

/// Whose usage a counter accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One API key
    PerUser,
    /// Every API key combined
    Global,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::PerUser => write!(f, "user"),
            Scope::Global => write!(f, "global"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "per_user" => Ok(Scope::PerUser),
            "global" => Ok(Scope::Global),
            _ => Err(format!("Unknown scope: {}", s)),
        }
    }
}

// ============================================================================
// Period
// ============================================================================

/// Accounting period of a counter
///
/// Daily and monthly counters live in calendar buckets (UTC) and roll over by
/// key name. Lifetime and recurring-cycle counters have a single bucket;
/// recurring-cycle counters are reset externally at the subscriber's cycle
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Monthly,
    Lifetime,
    RecurringCycle,
}

impl Period {
    /// Calendar bucket containing `at`, or `None` for single-bucket periods
    pub fn bucket(&self, at: DateTime<Utc>) -> Option<String> {
        match self {
            Period::Daily => Some(at.format("%Y%m%d").to_string()),
            Period::Monthly => Some(at.format("%Y%m").to_string()),
            Period::Lifetime | Period::RecurringCycle => None,
        }
    }

    /// Whether counters of this period are split into calendar buckets
    pub fn is_bucketed(&self) -> bool {
        matches!(self, Period::Daily | Period::Monthly)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Monthly => write!(f, "monthly"),
            Period::Lifetime => write!(f, "lifetime"),
            Period::RecurringCycle => write!(f, "recurring"),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(Period::Daily),
            "monthly" | "month" => Ok(Period::Monthly),
            "lifetime" => Ok(Period::Lifetime),
            "recurring" | "recurring_cycle" | "cycle" => Ok(Period::RecurringCycle),
            _ => Err(format!("Unknown period: {}", s)),
        }
    }
}

// ============================================================================
// Request Type
// ============================================================================

/// Kind of billable request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Translation,
    Transliteration,
    Audio,
    Dictionary,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::Translation => write!(f, "translation"),
            RequestType::Transliteration => write!(f, "transliteration"),
            RequestType::Audio => write!(f, "audio"),
            RequestType::Dictionary => write!(f, "dictionary"),
        }
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "translation" | "translate" => Ok(RequestType::Translation),
            "transliteration" | "transliterate" => Ok(RequestType::Transliteration),
            "audio" | "tts" => Ok(RequestType::Audio),
            "dictionary" | "lookup" => Ok(RequestType::Dictionary),
            _ => Err(format!("Unknown request type: {}", s)),
        }
    }
}

// ============================================================================
// Usage Counter
// ============================================================================

/// Value of one usage counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub characters: i64,
    pub requests: i64,
}

impl UsageCounter {
    pub const CHARACTERS_FIELD: &'static str = "characters";
    pub const REQUESTS_FIELD: &'static str = "requests";

    /// Read a counter out of its hash fields (missing fields count as zero)
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        Ok(Self {
            characters: parse_counter(fields, key, Self::CHARACTERS_FIELD)?,
            requests: parse_counter(fields, key, Self::REQUESTS_FIELD)?,
        })
    }
}

// ============================================================================
// Counter Key
// ============================================================================

/// Composite key of a usage counter
///
/// `service` and `request_type` are `None` for plan counters, which aggregate
/// a key's usage across every service and request type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub scope: Scope,
    pub period: Period,
    /// Calendar bucket for daily/monthly periods
    pub bucket: Option<String>,
    /// Owning key for per-user counters
    pub api_key: Option<String>,
    pub service: Option<String>,
    pub request_type: Option<RequestType>,
}

impl CounterKey {
    /// Per-user counter for one service and request type
    pub fn user(
        period: Period,
        at: DateTime<Utc>,
        api_key: &str,
        service: &str,
        request_type: RequestType,
    ) -> Self {
        Self {
            scope: Scope::PerUser,
            period,
            bucket: period.bucket(at),
            api_key: Some(api_key.to_string()),
            service: Some(service.to_string()),
            request_type: Some(request_type),
        }
    }

    /// Global counter for one service and request type
    pub fn global(
        period: Period,
        at: DateTime<Utc>,
        service: &str,
        request_type: RequestType,
    ) -> Self {
        Self {
            scope: Scope::Global,
            period,
            bucket: period.bucket(at),
            api_key: None,
            service: Some(service.to_string()),
            request_type: Some(request_type),
        }
    }

    /// Per-user plan counter across all services and request types
    pub fn plan(period: Period, at: DateTime<Utc>, api_key: &str) -> Self {
        Self {
            scope: Scope::PerUser,
            period,
            bucket: period.bucket(at),
            api_key: Some(api_key.to_string()),
            service: None,
            request_type: None,
        }
    }

    /// Whether this is an all-services plan counter
    pub fn is_plan_counter(&self) -> bool {
        self.service.is_none() && self.request_type.is_none()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_buckets() {
        let at = Utc.with_ymd_and_hms(2021, 3, 5, 23, 59, 0).unwrap();
        assert_eq!(Period::Daily.bucket(at).as_deref(), Some("20210305"));
        assert_eq!(Period::Monthly.bucket(at).as_deref(), Some("202103"));
        assert_eq!(Period::Lifetime.bucket(at), None);
        assert_eq!(Period::RecurringCycle.bucket(at), None);
    }

    #[test]
    fn test_period_roundtrip() {
        for period in [
            Period::Daily,
            Period::Monthly,
            Period::Lifetime,
            Period::RecurringCycle,
        ] {
            assert_eq!(period.to_string().parse::<Period>().unwrap(), period);
        }
    }

    #[test]
    fn test_request_type_aliases() {
        assert_eq!("tts".parse::<RequestType>().unwrap(), RequestType::Audio);
        assert_eq!(
            "Translate".parse::<RequestType>().unwrap(),
            RequestType::Translation
        );
        assert!("ocr".parse::<RequestType>().is_err());
    }

    #[test]
    fn test_usage_counter_from_fields() {
        let mut fields = HashMap::new();
        fields.insert("characters".to_string(), "120".to_string());
        let counter = UsageCounter::from_fields("k", &fields).unwrap();
        assert_eq!(
            counter,
            UsageCounter {
                characters: 120,
                requests: 0
            }
        );
    }

    #[test]
    fn test_counter_key_constructors() {
        let at = Utc.with_ymd_and_hms(2021, 3, 5, 0, 0, 0).unwrap();
        let user = CounterKey::user(Period::Monthly, at, "k1", "Azure", RequestType::Audio);
        assert_eq!(user.bucket.as_deref(), Some("202103"));
        assert!(!user.is_plan_counter());

        let plan = CounterKey::plan(Period::Lifetime, at, "k1");
        assert!(plan.is_plan_counter());
        assert!(plan.bucket.is_none());

        let global = CounterKey::global(Period::Daily, at, "Azure", RequestType::Audio);
        assert!(global.api_key.is_none());
        assert_eq!(global.scope, Scope::Global);
    }
}
