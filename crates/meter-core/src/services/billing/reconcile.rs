//! Billing reconciliation
//!
//! Reports each metered key's billing slice to the provider. The slice is
//! read without resetting it; only after the provider confirms the report are
//! exactly the reported characters subtracted. A failed report therefore
//! leaves the slice intact, and charges that arrive while a report is in
//! flight stay in the slice for the next run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::provider::{BillingProvider, CustomerAccount};
use crate::config::MeterConfig;
use crate::db::KvStore;
use crate::models::{ApiKeyRecord, KeyType};
use crate::services::metering::{BillingSlice, KeyAdmin, KeyLayout, KeyStore, MeterError};

/// Headroom kept below the quota when overage is not allowed
const QUOTA_HEADROOM_UNITS: f64 = 0.001;

/// Why a key was not reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The key has no billing provider customer
    NoCustomerCode,
    /// The customer's subscription is canceled
    CustomerCanceled,
    /// Nothing accumulated since the last report
    NothingToReport,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCustomerCode => write!(f, "no customer code"),
            SkipReason::CustomerCanceled => write!(f, "customer canceled"),
            SkipReason::NothingToReport => write!(f, "nothing to report"),
        }
    }
}

/// Result of reconciling one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// Usage delivered and removed from the slice
    Reported { characters: i64, units: f64 },
    Skipped { reason: SkipReason },
    /// The report failed; the slice is untouched
    Failed { error: String },
}

/// One row of a reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyReport {
    pub api_key: String,
    #[serde(flatten)]
    pub outcome: ReportOutcome,
}

/// Summary of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub keys: Vec<KeyReport>,
}

impl ReconcileSummary {
    pub fn reported(&self) -> usize {
        self.count(|o| matches!(o, ReportOutcome::Reported { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ReportOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ReportOutcome::Failed { .. }))
    }

    /// Characters removed from slices in this run
    pub fn characters_reported(&self) -> i64 {
        self.keys
            .iter()
            .map(|k| match k.outcome {
                ReportOutcome::Reported { characters, .. } => characters,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&ReportOutcome) -> bool) -> usize {
        self.keys.iter().filter(|k| pred(&k.outcome)).count()
    }
}

/// Billing units to report for `characters`
///
/// Without overage the report is clamped just under the remaining quota, so
/// the provider never bills past the plan.
pub fn billable_units(characters: i64, char_multiplier: i64, account: &CustomerAccount) -> f64 {
    let units = characters as f64 / char_multiplier.max(1) as f64;
    if account.overage_allowed {
        units
    } else {
        let remaining = account.quota_units - account.used_units - QUOTA_HEADROOM_UNITS;
        remaining.min(units).max(0.0)
    }
}

/// Reports billing slices to a [`BillingProvider`]
pub struct BillingReconciler {
    keys: KeyStore,
    admin: KeyAdmin,
    slice: BillingSlice,
    provider: Arc<dyn BillingProvider>,
    char_multiplier: i64,
}

impl BillingReconciler {
    pub fn new(
        store: Arc<dyn KvStore>,
        config: &MeterConfig,
        provider: Arc<dyn BillingProvider>,
    ) -> Self {
        let layout = KeyLayout::new(config.key_prefix.clone());
        Self {
            keys: KeyStore::new(store.clone(), layout.clone()),
            admin: KeyAdmin::new(store.clone(), layout.clone()),
            slice: BillingSlice::new(store, layout),
            provider,
            char_multiplier: config.billing.char_multiplier,
        }
    }

    /// Reconcile every metered key
    ///
    /// A failing key is logged and recorded; the run continues. Only a store
    /// failure while listing keys aborts the run.
    pub async fn report_all(&self) -> Result<ReconcileSummary, MeterError> {
        let api_keys = self.keys.list(KeyType::MeteredSubscriber).await?;
        log::info!(
            "[meter:reconcile] reporting {} keys to {}",
            api_keys.len(),
            self.provider.provider_id()
        );

        let mut summary = ReconcileSummary::default();
        for api_key in api_keys {
            let outcome = match self.report_key(&api_key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("[meter:reconcile] could not report usage for {}: {}", api_key, e);
                    ReportOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            summary.keys.push(KeyReport { api_key, outcome });
        }

        log::info!(
            "[meter:reconcile] done: {} reported, {} skipped, {} failed",
            summary.reported(),
            summary.skipped(),
            summary.failed()
        );
        Ok(summary)
    }

    /// Reconcile one key
    pub async fn report_key(&self, api_key: &str) -> Result<ReportOutcome, MeterError> {
        let record = self.keys.resolve(api_key).await?;
        let Some(customer_code) = record.customer_code.clone() else {
            log::debug!("[meter:reconcile] {} has no customer code", api_key);
            return Ok(ReportOutcome::Skipped {
                reason: SkipReason::NoCustomerCode,
            });
        };

        let account = self.provider.get_customer(&customer_code).await?;
        if account.is_canceled() {
            log::info!(
                "[meter:reconcile] not reporting {}: customer {} is canceled",
                api_key,
                customer_code
            );
            return Ok(ReportOutcome::Skipped {
                reason: SkipReason::CustomerCanceled,
            });
        }

        let characters = self.slice.read(api_key).await?;
        if characters <= 0 {
            return Ok(ReportOutcome::Skipped {
                reason: SkipReason::NothingToReport,
            });
        }

        let units = billable_units(characters, self.char_multiplier, &account);
        let account = if units > 0.0 {
            log::info!(
                "[meter:reconcile] reporting {} units ({} characters) for {}",
                units,
                characters,
                api_key
            );
            self.provider.report_usage(&customer_code, units).await?
        } else {
            // Quota exhausted without overage: nothing billable
            log::info!(
                "[meter:reconcile] {} has no billable quota left, dropping {} characters",
                api_key,
                characters
            );
            account
        };

        self.slice.acknowledge(api_key, characters).await?;
        self.sync_plan(&record, &account).await?;

        Ok(ReportOutcome::Reported { characters, units })
    }

    /// Mirror the provider's plan onto the key record
    ///
    /// Only the limit and overage flag are written; a status change made
    /// while the report was in flight is kept.
    async fn sync_plan(
        &self,
        record: &ApiKeyRecord,
        account: &CustomerAccount,
    ) -> Result<(), MeterError> {
        let character_limit = (account.quota_units * self.char_multiplier as f64).round() as i64;
        if record.character_limit == character_limit
            && record.overage_allowed == account.overage_allowed
        {
            return Ok(());
        }

        self.admin
            .set_plan(&record.api_key, character_limit, account.overage_allowed)
            .await?;
        log::info!(
            "[meter:reconcile] {} plan synced: limit {}, overage {}",
            record.api_key,
            character_limit,
            account.overage_allowed
        );
        Ok(())
    }
}
