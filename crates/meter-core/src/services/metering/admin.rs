//! Key administration
//!
//! Issuance and administrative updates of [`ApiKeyRecord`]s. The request path
//! never writes records; everything here is driven by operators, webhooks or
//! the reconciliation job.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::error::MeterError;
use super::keystore::KeyStore;
use super::layout::KeyLayout;
use super::types::{CounterKey, Period, UsageCounter};
use crate::config::MeterConfig;
use crate::db::KvStore;
use crate::models::{encode_flag, normalize_email, record_field, ApiKeyRecord, KeyStatus, KeyType};

/// Length of generated API keys
pub const API_KEY_LENGTH: usize = 16;

const TRIAL_USER_FIELD: &str = "api_key";

/// Generate a random alphanumeric API key
pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// Outcome of a trial request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialIssuance {
    pub record: ApiKeyRecord,
    /// `false` when the email already held a trial key
    pub newly_issued: bool,
}

/// Writes API key records
#[derive(Clone)]
pub struct KeyAdmin {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
    keys: KeyStore,
}

impl KeyAdmin {
    pub fn new(store: Arc<dyn KvStore>, layout: KeyLayout) -> Self {
        let keys = KeyStore::new(store.clone(), layout.clone());
        Self {
            store,
            layout,
            keys,
        }
    }

    /// Persist a record and index it by type
    pub async fn save(&self, record: &ApiKeyRecord) -> Result<(), MeterError> {
        if record.api_key.is_empty() || record.api_key.contains(':') {
            return Err(MeterError::InvalidRequest(format!(
                "invalid api key: {:?}",
                record.api_key
            )));
        }
        check_limit(record.character_limit)?;

        self.store
            .set_fields(&self.layout.record(&record.api_key), &record.to_fields())
            .await?;
        self.store
            .add_member(&self.layout.key_index(record.key_type), &record.api_key, None)
            .await?;
        Ok(())
    }

    /// Issue a fresh key of any tier
    pub async fn issue(
        &self,
        key_type: KeyType,
        email: &str,
        character_limit: i64,
    ) -> Result<ApiKeyRecord, MeterError> {
        let record = ApiKeyRecord::new(generate_api_key(), key_type, email, character_limit);
        self.save(&record).await?;
        log::info!(
            "[meter:keys] issued {} key {} for {}",
            key_type,
            record.api_key,
            record.email
        );
        Ok(record)
    }

    /// Issue a trial key, at most one per email address
    ///
    /// Requesting a trial again for the same address returns the existing
    /// key. The claim on the address is an atomic set insertion, so two
    /// concurrent requests cannot both create a key. A claim whose key could
    /// not be written is released again.
    pub async fn issue_trial(
        &self,
        email: &str,
        config: &MeterConfig,
    ) -> Result<TrialIssuance, MeterError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(MeterError::InvalidRequest("email is required".to_string()));
        }

        let claimed = self
            .store
            .add_member(&self.layout.trial_claims(), &email, None)
            .await?;

        if !claimed {
            let fields = self.store.get_fields(&self.layout.trial_user(&email)).await?;
            let Some(api_key) = fields.get(TRIAL_USER_FIELD) else {
                return Err(MeterError::InvalidRequest(format!(
                    "trial issuance for {} is in progress",
                    email
                )));
            };
            log::info!("[meter:keys] {} already holds trial key {}", email, api_key);
            return Ok(TrialIssuance {
                record: self.keys.resolve(api_key).await?,
                newly_issued: false,
            });
        }

        let record = ApiKeyRecord::new(
            generate_api_key(),
            KeyType::Trial,
            &email,
            config.trial_character_limit,
        )
        .with_expiration(Utc::now() + Duration::days(i64::from(config.trial_validity_days)));

        if let Err(e) = self.write_trial(&email, &record).await {
            log::error!("[meter:keys] trial issuance for {} failed: {}", email, e);
            self.release_trial(&email, &record).await;
            return Err(e);
        }

        log::info!("[meter:keys] issued trial key {} for {}", record.api_key, email);
        Ok(TrialIssuance {
            record,
            newly_issued: true,
        })
    }

    async fn write_trial(&self, email: &str, record: &ApiKeyRecord) -> Result<(), MeterError> {
        self.save(record).await?;
        self.store
            .set_fields(
                &self.layout.trial_user(email),
                &[(TRIAL_USER_FIELD, record.api_key.clone())],
            )
            .await?;
        Ok(())
    }

    /// Undo a partial trial issuance so the address can request again
    async fn release_trial(&self, email: &str, record: &ApiKeyRecord) {
        let cleanup = async {
            self.store
                .remove_member(&self.layout.key_index(KeyType::Trial), &record.api_key)
                .await?;
            self.store.delete(&self.layout.record(&record.api_key)).await?;
            self.store
                .remove_member(&self.layout.trial_claims(), email)
                .await
        };
        if let Err(e) = cleanup.await {
            log::error!("[meter:keys] could not release trial claim of {}: {}", email, e);
        }
    }

    /// Overwrite only `fields` of an existing record and return the result
    ///
    /// Fields that are not named keep whatever value the store holds, so
    /// concurrent updates of different fields never undo each other.
    async fn update(
        &self,
        api_key: &str,
        fields: &[(&str, String)],
    ) -> Result<ApiKeyRecord, MeterError> {
        self.keys.resolve(api_key).await?;
        self.store
            .set_fields(&self.layout.record(api_key), fields)
            .await?;
        self.keys.resolve(api_key).await
    }

    /// Move the expiration of `api_key` to `until`
    pub async fn extend_expiration(
        &self,
        api_key: &str,
        until: DateTime<Utc>,
    ) -> Result<ApiKeyRecord, MeterError> {
        let record = self
            .update(
                api_key,
                &[(record_field::EXPIRATION, until.timestamp().to_string())],
            )
            .await?;
        log::info!("[meter:keys] {} now expires {}", api_key, until.to_rfc3339());
        Ok(record)
    }

    pub async fn set_character_limit(
        &self,
        api_key: &str,
        character_limit: i64,
    ) -> Result<ApiKeyRecord, MeterError> {
        check_limit(character_limit)?;
        let record = self
            .update(
                api_key,
                &[(record_field::CHARACTER_LIMIT, character_limit.to_string())],
            )
            .await?;
        log::info!("[meter:keys] {} character limit set to {}", api_key, character_limit);
        Ok(record)
    }

    pub async fn set_overage(
        &self,
        api_key: &str,
        overage_allowed: bool,
    ) -> Result<ApiKeyRecord, MeterError> {
        self.update(
            api_key,
            &[(record_field::OVERAGE_ALLOWED, encode_flag(overage_allowed))],
        )
        .await
    }

    /// Set limit and overage together, as a billing plan defines them
    pub async fn set_plan(
        &self,
        api_key: &str,
        character_limit: i64,
        overage_allowed: bool,
    ) -> Result<ApiKeyRecord, MeterError> {
        check_limit(character_limit)?;
        let record = self
            .update(
                api_key,
                &[
                    (record_field::CHARACTER_LIMIT, character_limit.to_string()),
                    (record_field::OVERAGE_ALLOWED, encode_flag(overage_allowed)),
                ],
            )
            .await?;
        log::info!(
            "[meter:keys] {} plan set: limit {}, overage {}",
            api_key,
            character_limit,
            overage_allowed
        );
        Ok(record)
    }

    /// Cancel, delete or reactivate a key
    pub async fn set_status(
        &self,
        api_key: &str,
        status: KeyStatus,
    ) -> Result<ApiKeyRecord, MeterError> {
        let record = self
            .update(api_key, &[(record_field::STATUS, status.to_string())])
            .await?;
        log::info!("[meter:keys] {} status set to {}", api_key, status);
        Ok(record)
    }

    /// Start a new billing cycle for a metered key
    ///
    /// Clears the recurring plan counter and returns what it held. Charges
    /// that land between the read and the clear are dropped with it.
    pub async fn reset_cycle(&self, api_key: &str) -> Result<UsageCounter, MeterError> {
        let record = self.keys.resolve(api_key).await?;
        if record.key_type != KeyType::MeteredSubscriber {
            return Err(MeterError::InvalidRequest(format!(
                "{} is a {} key; only metered keys have a billing cycle",
                api_key, record.key_type
            )));
        }

        let key = self
            .layout
            .counter(&CounterKey::plan(Period::RecurringCycle, Utc::now(), api_key));
        let previous = UsageCounter::from_fields(&key, &self.store.get_fields(&key).await?)?;
        self.store.delete(&key).await?;

        log::info!(
            "[meter:keys] {} billing cycle reset ({} characters, {} requests)",
            api_key,
            previous.characters,
            previous.requests
        );
        Ok(previous)
    }
}

fn check_limit(character_limit: i64) -> Result<(), MeterError> {
    if character_limit < 0 {
        return Err(MeterError::InvalidRequest(format!(
            "character limit must not be negative: {}",
            character_limit
        )));
    }
    Ok(())
}
