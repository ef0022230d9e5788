//! Store key layout
//!
//! Every key the meter writes is built here. Counter keys embed the full
//! composite tuple, so distinct tuples never share a key and calendar
//! rollover is nothing more than a new bucket string:
//!
//! ```text
//! clt:api_key:<api_key>                                         record
//! clt:api_key_index:<key_type>                                  set of api keys
//! clt:trial_users                                               set of claimed trial emails
//! clt:trial_user:<email>                                        trial issuance
//! clt:usage:user:<period>[:<bucket>]:<service>:<type>:<api_key> per-user counter
//! clt:usage:user:<period>[:<bucket>]:all:all:<api_key>         plan counter
//! clt:usage:global:<period>[:<bucket>]:<service>:<type>         global counter
//! clt:usage:slice:<api_key>                                     billing slice
//! clt:user:<dimension>:<api_key>                                seen set
//! ```
//!
//! `all` is reserved: it cannot be used as a service name.

use super::types::{CounterKey, Period, RequestType, Scope};
use crate::models::KeyType;

/// Placeholder for "all services" / "all request types"
pub const ALL_MARKER: &str = "all";

/// Builds and parses store keys under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn record(&self, api_key: &str) -> String {
        format!("{}:api_key:{}", self.prefix, api_key)
    }

    pub fn key_index(&self, key_type: KeyType) -> String {
        format!("{}:api_key_index:{}", self.prefix, key_type)
    }

    /// Set used to claim a trial for an email address
    pub fn trial_claims(&self) -> String {
        format!("{}:trial_users", self.prefix)
    }

    pub fn trial_user(&self, email: &str) -> String {
        format!("{}:trial_user:{}", self.prefix, email)
    }

    pub fn slice(&self, api_key: &str) -> String {
        format!("{}:usage:slice:{}", self.prefix, api_key)
    }

    pub fn seen(&self, dimension: &str, api_key: &str) -> String {
        format!("{}:user:{}:{}", self.prefix, dimension, api_key)
    }

    /// Prefix shared by every counter of `scope` and `period`
    pub fn usage_prefix(&self, scope: Scope, period: Period) -> String {
        format!("{}:usage:{}:{}:", self.prefix, scope, period)
    }

    /// Store key of a usage counter
    pub fn counter(&self, key: &CounterKey) -> String {
        let mut parts: Vec<String> = vec![
            self.prefix.clone(),
            "usage".to_string(),
            key.scope.to_string(),
            key.period.to_string(),
        ];
        if let Some(bucket) = &key.bucket {
            parts.push(bucket.clone());
        }
        parts.push(
            key.service
                .clone()
                .unwrap_or_else(|| ALL_MARKER.to_string()),
        );
        parts.push(
            key.request_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| ALL_MARKER.to_string()),
        );
        if let Some(api_key) = &key.api_key {
            parts.push(api_key.clone());
        }
        parts.join(":")
    }

    /// Inverse of [`KeyLayout::counter`]; `None` for anything that is not a
    /// counter key under this prefix
    pub fn parse_counter(&self, store_key: &str) -> Option<CounterKey> {
        let rest = store_key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(":usage:")?;
        let mut parts = rest.split(':');

        let scope = parts.next()?.parse::<Scope>().ok()?;
        let period = parts.next()?.parse::<Period>().ok()?;
        let bucket = if period.is_bucketed() {
            Some(parts.next()?.to_string())
        } else {
            None
        };
        let service = match parts.next()? {
            ALL_MARKER => None,
            s => Some(s.to_string()),
        };
        let request_type = match parts.next()? {
            ALL_MARKER => None,
            t => Some(t.parse::<RequestType>().ok()?),
        };
        let api_key = match scope {
            Scope::PerUser => Some(parts.next()?.to_string()),
            Scope::Global => None,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(CounterKey {
            scope,
            period,
            bucket,
            api_key,
            service,
            request_type,
        })
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KEY_PREFIX)
    }
}

/// Whether `component` can be embedded in a key without ambiguity
pub fn is_valid_component(component: &str) -> bool {
    !component.is_empty() && component != ALL_MARKER && !component.contains(':')
}
