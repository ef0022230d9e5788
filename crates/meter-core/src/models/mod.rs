//! Data models
//!
//! API key records and their plan/status enums. Records are persisted as
//! hashes, so every type here knows how to convert to and from string fields.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Key Type
// ============================================================================

/// Entitlement tier of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Free trial with an absolute character cap
    Trial,
    /// Patreon supporter with a calendar-month quota
    PatreonSubscriber,
    /// Metered subscription, monthly quota per billing cycle, optional overage
    MeteredSubscriber,
    /// Granted key without character accounting limit
    LifetimeGrant,
}

impl KeyType {
    /// All tiers, in display order
    pub const ALL: [KeyType; 4] = [
        KeyType::Trial,
        KeyType::PatreonSubscriber,
        KeyType::MeteredSubscriber,
        KeyType::LifetimeGrant,
    ];
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Trial => write!(f, "trial"),
            KeyType::PatreonSubscriber => write!(f, "patreon"),
            KeyType::MeteredSubscriber => write!(f, "metered"),
            KeyType::LifetimeGrant => write!(f, "lifetime"),
        }
    }
}

impl std::str::FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(KeyType::Trial),
            "patreon" | "patreon_subscriber" => Ok(KeyType::PatreonSubscriber),
            "metered" | "metered_subscriber" | "getcheddar" => Ok(KeyType::MeteredSubscriber),
            "lifetime" | "lifetime_grant" | "grant" => Ok(KeyType::LifetimeGrant),
            _ => Err(format!("Unknown key type: {}", s)),
        }
    }
}

// ============================================================================
// Key Status
// ============================================================================

/// Administrative status of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Canceled,
    Deleted,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStatus::Active => write!(f, "active"),
            KeyStatus::Canceled => write!(f, "canceled"),
            KeyStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(KeyStatus::Active),
            "canceled" | "cancelled" => Ok(KeyStatus::Canceled),
            "deleted" => Ok(KeyStatus::Deleted),
            _ => Err(format!("Unknown key status: {}", s)),
        }
    }
}

// ============================================================================
// API Key Record
// ============================================================================

/// Hash field names of a stored [`ApiKeyRecord`]
pub mod record_field {
    pub const KEY_TYPE: &str = "key_type";
    pub const EMAIL: &str = "email";
    pub const CHARACTER_LIMIT: &str = "character_limit";
    pub const OVERAGE_ALLOWED: &str = "overage_allowed";
    pub const EXPIRATION: &str = "expiration";
    pub const STATUS: &str = "status";
    pub const CUSTOMER_CODE: &str = "customer_code";
}

/// Identity and entitlement snapshot of an API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Opaque key string, immutable once issued
    pub api_key: String,
    /// Entitlement tier, immutable
    pub key_type: KeyType,
    /// Lower-cased owner contact
    pub email: String,
    /// Character quota; meaning depends on `key_type`
    pub character_limit: i64,
    /// Whether usage beyond `character_limit` is served and billed
    pub overage_allowed: bool,
    /// Expiration as unix seconds
    pub expiration: Option<i64>,
    pub status: KeyStatus,
    /// Customer code at the billing provider (metered subscribers)
    pub customer_code: Option<String>,
}

impl ApiKeyRecord {
    /// Create an active record with no expiration
    pub fn new(
        api_key: impl Into<String>,
        key_type: KeyType,
        email: &str,
        character_limit: i64,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            key_type,
            email: normalize_email(email),
            character_limit,
            overage_allowed: false,
            expiration: None,
            status: KeyStatus::Active,
            customer_code: None,
        }
    }

    /// Allow billed usage beyond the quota
    pub fn with_overage(mut self, overage_allowed: bool) -> Self {
        self.overage_allowed = overage_allowed;
        self
    }

    /// Set the expiration instant
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration.timestamp());
        self
    }

    /// Set the billing provider customer code
    pub fn with_customer_code(mut self, code: impl Into<String>) -> Self {
        self.customer_code = Some(code.into());
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: KeyStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the expiration has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp < now.timestamp())
    }

    /// Expiration as a datetime
    pub fn expiration_datetime(&self) -> Option<DateTime<Utc>> {
        self.expiration
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Hash fields for persistence (everything except the key itself)
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (record_field::KEY_TYPE, self.key_type.to_string()),
            (record_field::EMAIL, self.email.clone()),
            (record_field::CHARACTER_LIMIT, self.character_limit.to_string()),
            (record_field::OVERAGE_ALLOWED, encode_flag(self.overage_allowed)),
            (record_field::STATUS, self.status.to_string()),
        ];
        if let Some(expiration) = self.expiration {
            fields.push((record_field::EXPIRATION, expiration.to_string()));
        }
        if let Some(code) = &self.customer_code {
            fields.push((record_field::CUSTOMER_CODE, code.clone()));
        }
        fields
    }

    /// Rebuild a record from its hash fields
    ///
    /// Returns a description of the first malformed field on failure.
    pub fn from_fields(api_key: &str, fields: &HashMap<String, String>) -> Result<Self, String> {
        let get = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| format!("missing field {}", name))
        };

        let key_type = get(record_field::KEY_TYPE)?.parse::<KeyType>()?;
        let character_limit = get(record_field::CHARACTER_LIMIT)?
            .parse::<i64>()
            .map_err(|e| format!("character_limit: {}", e))?;
        let overage_allowed = match fields.get(record_field::OVERAGE_ALLOWED).map(String::as_str) {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => return Err(format!("overage_allowed: {}", other)),
        };
        let expiration = match fields.get(record_field::EXPIRATION) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|e| format!("expiration: {}", e))?,
            ),
            None => None,
        };
        let status = match fields.get(record_field::STATUS) {
            Some(raw) => raw.parse::<KeyStatus>()?,
            None => KeyStatus::Active,
        };

        Ok(Self {
            api_key: api_key.to_string(),
            key_type,
            email: fields.get(record_field::EMAIL).cloned().unwrap_or_default(),
            character_limit,
            overage_allowed,
            expiration,
            status,
            customer_code: fields.get(record_field::CUSTOMER_CODE).cloned(),
        })
    }
}

/// Stored form of a boolean record field
pub fn encode_flag(flag: bool) -> String {
    (flag as u8).to_string()
}

/// Lower-case and trim an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
