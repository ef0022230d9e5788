//! Usage listing
//!
//! Read-only scans over the counter keyspace for operators and exports.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::MeterError;
use super::layout::KeyLayout;
use super::types::{CounterKey, Period, Scope, UsageCounter};
use crate::db::KvStore;

/// One counter and its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRow {
    pub key: CounterKey,
    pub usage: UsageCounter,
}

/// Narrows a listing
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub api_key: Option<String>,
    pub service: Option<String>,
    /// Inclusive lower bucket, e.g. `20260301` or `202603`
    pub start_bucket: Option<String>,
    /// Inclusive upper bucket
    pub end_bucket: Option<String>,
}

impl UsageFilter {
    fn matches(&self, key: &CounterKey) -> bool {
        if let Some(api_key) = &self.api_key {
            if key.api_key.as_ref() != Some(api_key) {
                return false;
            }
        }
        if let Some(service) = &self.service {
            if !key
                .service
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(service))
            {
                return false;
            }
        }
        // Buckets of one period share a fixed-width format, so string
        // comparison orders them chronologically.
        match key.bucket.as_deref() {
            Some(bucket) => {
                self.start_bucket.as_deref().map_or(true, |s| bucket >= s)
                    && self.end_bucket.as_deref().map_or(true, |e| bucket <= e)
            }
            None => true,
        }
    }
}

/// Scans counters by scope and period
#[derive(Clone)]
pub struct UsageReport {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
}

impl UsageReport {
    pub fn new(store: Arc<dyn KvStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Every counter of `scope` and `period` passing `filter`, sorted by
    /// bucket then key
    pub async fn list(
        &self,
        scope: Scope,
        period: Period,
        filter: &UsageFilter,
    ) -> Result<Vec<UsageRow>, MeterError> {
        let store_keys = self
            .store
            .keys_with_prefix(&self.layout.usage_prefix(scope, period))
            .await?;

        let mut rows = Vec::new();
        for store_key in store_keys {
            let Some(key) = self.layout.parse_counter(&store_key) else {
                log::debug!("[meter:counter] skipping unparseable key {}", store_key);
                continue;
            };
            if !filter.matches(&key) {
                continue;
            }
            let fields = self.store.get_fields(&store_key).await?;
            if fields.is_empty() {
                // Expired between the scan and the read
                continue;
            }
            rows.push(UsageRow {
                usage: UsageCounter::from_fields(&store_key, &fields)?,
                key,
            });
        }

        rows.sort_by(|a, b| {
            a.key
                .bucket
                .cmp(&b.key.bucket)
                .then_with(|| a.key.api_key.cmp(&b.key.api_key))
                .then_with(|| a.key.service.cmp(&b.key.service))
                .then_with(|| {
                    a.key
                        .request_type
                        .map(|t| t.to_string())
                        .cmp(&b.key.request_type.map(|t| t.to_string()))
                })
        });
        Ok(rows)
    }

    /// Counters of `api_key` in the buckets containing `now`
    pub async fn current_for_key(
        &self,
        api_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UsageRow>, MeterError> {
        let mut rows = Vec::new();
        for period in [
            Period::Daily,
            Period::Monthly,
            Period::Lifetime,
            Period::RecurringCycle,
        ] {
            let bucket = period.bucket(now);
            let filter = UsageFilter {
                api_key: Some(api_key.to_string()),
                start_bucket: bucket.clone(),
                end_bucket: bucket,
                ..UsageFilter::default()
            };
            rows.extend(self.list(Scope::PerUser, period, &filter).await?);
        }
        Ok(rows)
    }
}
