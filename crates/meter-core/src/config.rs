//! Meter configuration
//!
//! Settings are read from `METER_*` environment variables, falling back to
//! defaults. [`MeterConfig::validate`] clamps values into their usable range,
//! so callers should always go through [`MeterConfig::from_env`] or call
//! `validate()` themselves after building a config by hand.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default prefix for every key written to the store
pub const DEFAULT_KEY_PREFIX: &str = "clt";

/// Default lifetime of daily buckets (two calendar days)
pub const DEFAULT_DAILY_TTL_DAYS: u32 = 2;

/// Default lifetime of monthly buckets (two calendar months)
pub const DEFAULT_MONTHLY_TTL_DAYS: u32 = 62;

/// Minimum lifetime of monthly buckets
pub const MIN_MONTHLY_TTL_DAYS: u32 = 28;

/// Characters granted to a new trial key
pub const DEFAULT_TRIAL_CHARACTER_LIMIT: i64 = 25_000;

/// How long a new trial key stays valid
pub const DEFAULT_TRIAL_VALIDITY_DAYS: u32 = 30;

/// Characters per billing unit ("thousand chars")
pub const DEFAULT_CHAR_MULTIPLIER: i64 = 1000;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the external billing provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Base URL of the billing API; reconciliation is disabled when unset
    pub base_url: Option<String>,
    /// Basic-auth user
    pub user: Option<String>,
    /// Basic-auth secret
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Characters per reported unit
    pub char_multiplier: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user: None,
            api_key: None,
            char_multiplier: DEFAULT_CHAR_MULTIPLIER,
        }
    }
}

impl BillingConfig {
    /// Whether enough is configured to talk to the billing provider
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

/// Top-level configuration for the meter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// SQLite database backing the key-value store
    pub db_path: PathBuf,
    /// Prefix prepended to every store key
    pub key_prefix: String,
    /// Time-to-live of daily usage buckets
    pub daily_ttl_days: u32,
    /// Time-to-live of monthly usage buckets
    pub monthly_ttl_days: u32,
    /// Character limit given to newly issued trial keys
    pub trial_character_limit: i64,
    /// Validity of newly issued trial keys
    pub trial_validity_days: u32,
    /// Billing provider settings
    pub billing: BillingConfig,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("meter.db"),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            daily_ttl_days: DEFAULT_DAILY_TTL_DAYS,
            monthly_ttl_days: DEFAULT_MONTHLY_TTL_DAYS,
            trial_character_limit: DEFAULT_TRIAL_CHARACTER_LIMIT,
            trial_validity_days: DEFAULT_TRIAL_VALIDITY_DAYS,
            billing: BillingConfig::default(),
        }
    }
}

impl MeterConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self> {
        let config = Self {
            db_path: get_db_path()?,
            key_prefix: env_string("METER_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            daily_ttl_days: env_parse("METER_DAILY_TTL_DAYS")?
                .unwrap_or(DEFAULT_DAILY_TTL_DAYS),
            monthly_ttl_days: env_parse("METER_MONTHLY_TTL_DAYS")?
                .unwrap_or(DEFAULT_MONTHLY_TTL_DAYS),
            trial_character_limit: env_parse("METER_TRIAL_CHARACTER_LIMIT")?
                .unwrap_or(DEFAULT_TRIAL_CHARACTER_LIMIT),
            trial_validity_days: env_parse("METER_TRIAL_VALIDITY_DAYS")?
                .unwrap_or(DEFAULT_TRIAL_VALIDITY_DAYS),
            billing: BillingConfig {
                base_url: env_string("METER_BILLING_URL"),
                user: env_string("METER_BILLING_USER"),
                api_key: env_string("METER_BILLING_API_KEY"),
                char_multiplier: env_parse("METER_BILLING_CHAR_MULTIPLIER")?
                    .unwrap_or(DEFAULT_CHAR_MULTIPLIER),
            },
        };

        Ok(config.validate())
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let key_prefix = self.key_prefix.trim().trim_end_matches(':');
        Self {
            db_path: self.db_path.clone(),
            key_prefix: if key_prefix.is_empty() {
                DEFAULT_KEY_PREFIX.to_string()
            } else {
                key_prefix.to_string()
            },
            daily_ttl_days: self.daily_ttl_days.max(1),
            monthly_ttl_days: self.monthly_ttl_days.max(MIN_MONTHLY_TTL_DAYS),
            trial_character_limit: self.trial_character_limit.max(0),
            trial_validity_days: self.trial_validity_days.max(1),
            billing: BillingConfig {
                base_url: self
                    .billing
                    .base_url
                    .as_ref()
                    .map(|url| url.trim_end_matches('/').to_string()),
                user: self.billing.user.clone(),
                api_key: self.billing.api_key.clone(),
                char_multiplier: self.billing.char_multiplier.max(1),
            },
        }
    }
}

/// Resolve the database path
///
/// `METER_DB_PATH` wins (with `~` and `$VAR` expansion); otherwise the
/// platform data directory is used.
pub fn get_db_path() -> Result<PathBuf> {
    if let Some(path) = env_string("METER_DB_PATH") {
        let expanded = shellexpand::full(&path)
            .map_err(|e| Error::config(format!("Invalid METER_DB_PATH: {}", e)))?;
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    let dirs = directories::ProjectDirs::from("com", "cloudlanguagetools", "Meter")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.data_dir().join("meter.db"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} is not a valid number: {}", name, raw))),
        None => Ok(None),
    }
}
