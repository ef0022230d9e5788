//! Usage counter engine
//!
//! Charges and reads [`UsageCounter`]s. A charge adds the character count
//! and one request to each counter with the store's atomic increment; there
//! is no transaction spanning several counters, so a concurrent reader can
//! see one counter of a request updated before its siblings.

use std::sync::Arc;

use chrono::Duration;

use super::error::MeterError;
use super::layout::KeyLayout;
use super::types::{CounterKey, Period, UsageCounter};
use crate::config::MeterConfig;
use crate::db::KvStore;

/// Atomic multi-bucket usage counters
#[derive(Clone)]
pub struct CounterEngine {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
    daily_ttl: Duration,
    monthly_ttl: Duration,
}

impl CounterEngine {
    pub fn new(store: Arc<dyn KvStore>, config: &MeterConfig) -> Self {
        Self {
            store,
            layout: KeyLayout::new(config.key_prefix.clone()),
            daily_ttl: Duration::days(i64::from(config.daily_ttl_days)),
            monthly_ttl: Duration::days(i64::from(config.monthly_ttl_days)),
        }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Time-to-live of a counter; lifetime and cycle counters never expire
    pub fn ttl_for(&self, period: Period) -> Option<Duration> {
        match period {
            Period::Daily => Some(self.daily_ttl),
            Period::Monthly => Some(self.monthly_ttl),
            Period::Lifetime | Period::RecurringCycle => None,
        }
    }

    /// Add `characters` and one request to a counter
    ///
    /// Returns the post-increment value. Fails only when the store does.
    pub async fn charge(
        &self,
        key: &CounterKey,
        characters: i64,
    ) -> Result<UsageCounter, MeterError> {
        if characters < 0 {
            return Err(MeterError::InvalidRequest(format!(
                "cannot charge negative characters: {}",
                characters
            )));
        }

        let store_key = self.layout.counter(key);
        let ttl = self.ttl_for(key.period);

        let characters = self
            .store
            .incr_field(&store_key, UsageCounter::CHARACTERS_FIELD, characters, ttl)
            .await?;
        let requests = self
            .store
            .incr_field(&store_key, UsageCounter::REQUESTS_FIELD, 1, ttl)
            .await?;

        log::debug!(
            "[meter:counter] {} -> {} chars / {} requests",
            store_key,
            characters,
            requests
        );

        Ok(UsageCounter {
            characters,
            requests,
        })
    }

    /// Charge every counter in `keys`, in order
    ///
    /// Stops at the first store failure; counters charged before it stay
    /// charged.
    pub async fn charge_all(
        &self,
        keys: &[CounterKey],
        characters: i64,
    ) -> Result<Vec<UsageCounter>, MeterError> {
        let mut counters = Vec::with_capacity(keys.len());
        for key in keys {
            counters.push(self.charge(key, characters).await?);
        }
        Ok(counters)
    }

    /// Current value of a counter (zero if it does not exist)
    pub async fn read(&self, key: &CounterKey) -> Result<UsageCounter, MeterError> {
        let store_key = self.layout.counter(key);
        let fields = self.store.get_fields(&store_key).await?;
        Ok(UsageCounter::from_fields(&store_key, &fields)?)
    }
}
