//! Usage authorizer
//!
//! The request-scoped entry point: resolve the key, decide against the
//! limiting counter, then charge every tracked counter and the billing slice.
//!
//! Reading the limiting counter and charging it are two separate store
//! operations. Concurrent requests for one key can all read the same prior
//! usage and all be allowed, so a key may overshoot its limit by one request
//! per concurrent racer. Charges themselves are never lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::counter::CounterEngine;
use super::error::MeterError;
use super::keystore::KeyStore;
use super::layout::is_valid_component;
use super::policy::{Decision, DenyReason, QuotaPolicy};
use super::slice::BillingSlice;
use super::tracking::UsageTracker;
use super::types::{CounterKey, Period, RequestType, UsageCounter};
use crate::config::MeterConfig;
use crate::db::KvStore;
use crate::models::ApiKeyRecord;

/// One billable request as seen by the dispatch layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRequest {
    pub api_key: String,
    pub service: String,
    pub request_type: RequestType,
    pub characters: i64,
    /// Target language, when the request has one
    pub language: Option<String>,
    pub client: Option<String>,
    pub client_version: Option<String>,
}

impl UsageRequest {
    pub fn new(
        api_key: impl Into<String>,
        service: impl Into<String>,
        request_type: RequestType,
        characters: i64,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            service: service.into(),
            request_type,
            characters,
            language: None,
            client: None,
            client_version: None,
        }
    }

    fn validate(&self) -> Result<(), MeterError> {
        if self.characters < 0 {
            return Err(MeterError::InvalidRequest(format!(
                "character count must not be negative: {}",
                self.characters
            )));
        }
        if !is_valid_component(&self.service) {
            return Err(MeterError::InvalidRequest(format!(
                "invalid service name: {:?}",
                self.service
            )));
        }
        Ok(())
    }
}

/// Outcome of [`UsageAuthorizer::authorize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub allowed: bool,
    /// Post-charge value of the limiting counter; `None` when denied
    pub charged_counter: Option<UsageCounter>,
    pub deny_reason: Option<DenyReason>,
    /// Allowed beyond the quota, to be billed as overage
    pub over_quota_overage: bool,
}

impl AuthResult {
    fn denied(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            charged_counter: None,
            deny_reason: Some(reason),
            over_quota_overage: false,
        }
    }
}

/// Resolve, decide, charge
#[derive(Clone)]
pub struct UsageAuthorizer {
    keys: KeyStore,
    counters: CounterEngine,
    slice: BillingSlice,
    tracker: UsageTracker,
}

impl UsageAuthorizer {
    pub fn new(store: Arc<dyn KvStore>, config: &MeterConfig) -> Self {
        let counters = CounterEngine::new(store.clone(), config);
        let layout = counters.layout().clone();
        Self {
            keys: KeyStore::new(store.clone(), layout.clone()),
            slice: BillingSlice::new(store.clone(), layout.clone()),
            tracker: UsageTracker::new(store, layout),
            counters,
        }
    }

    pub fn counters(&self) -> &CounterEngine {
        &self.counters
    }

    /// Authorize and charge one request now
    ///
    /// Denials are returned as `Ok`; `Err` means the request must fail closed.
    pub async fn authorize(&self, request: &UsageRequest) -> Result<AuthResult, MeterError> {
        self.authorize_at(request, Utc::now()).await
    }

    /// [`UsageAuthorizer::authorize`] with buckets and expiry evaluated at `now`
    pub async fn authorize_at(
        &self,
        request: &UsageRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthResult, MeterError> {
        request.validate()?;

        let record = match self.keys.resolve(&request.api_key).await {
            Ok(record) => record,
            Err(MeterError::KeyNotFound(_)) => {
                log::warn!("[meter:authorize] unknown api key {:?}", request.api_key);
                return Ok(AuthResult::denied(DenyReason::KeyNotFound));
            }
            Err(e) => return Err(log_failure(&request.api_key, e)),
        };

        let limiting_key = QuotaPolicy::limiting_key(&record, now);
        let prior = self
            .counters
            .read(&limiting_key)
            .await
            .map_err(|e| log_failure(&request.api_key, e))?;

        let over_quota_overage =
            match QuotaPolicy::decide_at(&record, prior.characters, request.characters, now) {
                Decision::Deny { reason } => {
                    log::info!(
                        "[meter:authorize] {} denied: {} ({} + {} / {})",
                        record.api_key,
                        reason,
                        prior.characters,
                        request.characters,
                        record.character_limit
                    );
                    return Ok(AuthResult::denied(reason));
                }
                Decision::Allow { over_quota_overage } => over_quota_overage,
            };

        let charged_counter = self
            .charge(&record, &limiting_key, request, now)
            .await
            .map_err(|e| log_failure(&request.api_key, e))?;

        if let Err(e) = self.tracker.record(request).await {
            log::warn!(
                "[meter:authorize] {} seen-set update failed: {}",
                record.api_key,
                e
            );
        }

        if over_quota_overage {
            log::info!(
                "[meter:authorize] {} over quota, billed as overage ({} / {})",
                record.api_key,
                charged_counter.characters,
                record.character_limit
            );
        }

        Ok(AuthResult {
            allowed: true,
            charged_counter: Some(charged_counter),
            deny_reason: None,
            over_quota_overage,
        })
    }

    /// Counters charged for an allowed request, limiting counter last
    pub fn tracked_keys(
        record: &ApiKeyRecord,
        request: &UsageRequest,
        now: DateTime<Utc>,
    ) -> Vec<CounterKey> {
        let service = request.service.as_str();
        let request_type = request.request_type;
        vec![
            CounterKey::user(Period::Daily, now, &record.api_key, service, request_type),
            CounterKey::user(Period::Monthly, now, &record.api_key, service, request_type),
            CounterKey::user(Period::Lifetime, now, &record.api_key, service, request_type),
            CounterKey::global(Period::Daily, now, service, request_type),
            CounterKey::global(Period::Monthly, now, service, request_type),
            QuotaPolicy::limiting_key(record, now),
        ]
    }

    async fn charge(
        &self,
        record: &ApiKeyRecord,
        limiting_key: &CounterKey,
        request: &UsageRequest,
        now: DateTime<Utc>,
    ) -> Result<UsageCounter, MeterError> {
        let keys = Self::tracked_keys(record, request, now);
        let counters = self.counters.charge_all(&keys, request.characters).await?;
        self.slice.charge(&record.api_key, request.characters).await?;

        let charged = keys
            .iter()
            .zip(counters)
            .find(|(key, _)| *key == limiting_key)
            .map(|(_, counter)| counter)
            .unwrap_or_default();
        Ok(charged)
    }
}

fn log_failure(api_key: &str, err: MeterError) -> MeterError {
    log::error!("[meter:authorize] {} failed closed: {}", api_key, err);
    err
}
