//! Billing slice
//!
//! Per-key count of characters not yet reported to the billing provider.
//! The slice is additive, so a report that fails simply leaves the
//! characters in place for the next attempt.
//!
//! Two ways to take characters out of the slice, both lossless under
//! concurrent charges:
//!
//! - [`BillingSlice::snapshot_and_reset`] zeroes the slice with
//!   compare-and-swap, retrying when a charge lands between the read and the
//!   swap
//! - [`BillingSlice::acknowledge`] subtracts exactly the amount that was
//!   reported, leaving anything charged since the snapshot in place

use std::sync::Arc;

use super::error::MeterError;
use super::layout::KeyLayout;
use crate::db::{parse_counter, KvStore};

/// Swap attempts before falling back to subtracting the observed value
const MAX_RESET_ATTEMPTS: usize = 16;

const CHARACTERS_FIELD: &str = "characters";

/// Characters accumulated since the last confirmed report
#[derive(Clone)]
pub struct BillingSlice {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
}

impl BillingSlice {
    pub fn new(store: Arc<dyn KvStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Add `characters` to the slice of `api_key`
    pub async fn charge(&self, api_key: &str, characters: i64) -> Result<i64, MeterError> {
        let total = self
            .store
            .incr_field(&self.layout.slice(api_key), CHARACTERS_FIELD, characters, None)
            .await?;
        log::debug!("[meter:slice] {} slice now {}", api_key, total);
        Ok(total)
    }

    /// Current slice value without resetting it
    pub async fn read(&self, api_key: &str) -> Result<i64, MeterError> {
        let key = self.layout.slice(api_key);
        let fields = self.store.get_fields(&key).await?;
        Ok(parse_counter(&fields, &key, CHARACTERS_FIELD)?)
    }

    /// Atomically take the whole slice, leaving it at zero
    ///
    /// Returns the characters accumulated up to the reset instant. A charge
    /// racing with the reset either lands before the swap (and is included in
    /// the returned value) or after it (and stays in the new slice).
    pub async fn snapshot_and_reset(&self, api_key: &str) -> Result<i64, MeterError> {
        let key = self.layout.slice(api_key);
        let mut observed = 0;

        for attempt in 1..=MAX_RESET_ATTEMPTS {
            match self.try_reset(&key).await? {
                ResetAttempt::Reset(taken) => {
                    log::info!("[meter:slice] {} slice reset, took {}", api_key, taken);
                    return Ok(taken);
                }
                ResetAttempt::Conflict(seen) => {
                    log::debug!(
                        "[meter:slice] {} slice reset conflict on attempt {} (saw {})",
                        api_key,
                        attempt,
                        seen
                    );
                    observed = seen;
                    tokio::task::yield_now().await;
                }
            }
        }

        // Under sustained contention, subtract what we saw instead of
        // swapping; charges after the read survive the subtraction.
        let remaining = self
            .store
            .incr_field(&key, CHARACTERS_FIELD, -observed, None)
            .await?;
        log::info!(
            "[meter:slice] {} slice reset by subtraction, took {} ({} remaining)",
            api_key,
            observed,
            remaining
        );
        Ok(observed)
    }

    /// Remove exactly `reported` characters after a confirmed report
    ///
    /// Returns the characters still waiting to be reported.
    pub async fn acknowledge(&self, api_key: &str, reported: i64) -> Result<i64, MeterError> {
        if reported < 0 {
            return Err(MeterError::InvalidRequest(format!(
                "cannot acknowledge negative characters: {}",
                reported
            )));
        }
        let remaining = self
            .store
            .incr_field(&self.layout.slice(api_key), CHARACTERS_FIELD, -reported, None)
            .await?;
        log::info!(
            "[meter:slice] {} acknowledged {} ({} remaining)",
            api_key,
            reported,
            remaining
        );
        Ok(remaining)
    }

    async fn try_reset(&self, key: &str) -> Result<ResetAttempt, MeterError> {
        let fields = self.store.get_fields(key).await?;
        let current = parse_counter(&fields, key, CHARACTERS_FIELD)?;
        if current == 0 {
            return Ok(ResetAttempt::Reset(0));
        }
        if self
            .store
            .compare_and_set_field(key, CHARACTERS_FIELD, current, 0)
            .await?
        {
            Ok(ResetAttempt::Reset(current))
        } else {
            Ok(ResetAttempt::Conflict(current))
        }
    }
}

/// Result of one compare-and-swap reset attempt
enum ResetAttempt {
    Reset(i64),
    /// A charge landed between the read and the swap
    Conflict(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn slice() -> BillingSlice {
        BillingSlice::new(Arc::new(MemoryStore::new()), KeyLayout::default())
    }

    #[tokio::test]
    async fn test_reset_then_read_is_zero() {
        let slice = slice();
        slice.charge("k1", 300).await.unwrap();
        slice.charge("k1", 200).await.unwrap();

        assert_eq!(slice.snapshot_and_reset("k1").await.unwrap(), 500);
        assert_eq!(slice.read("k1").await.unwrap(), 0);
        assert_eq!(slice.snapshot_and_reset("k1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_untouched_slice_is_zero() {
        let slice = slice();
        assert_eq!(slice.read("nobody").await.unwrap(), 0);
        assert_eq!(slice.snapshot_and_reset("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_report_carries_over() {
        let slice = slice();
        slice.charge("k1", 500).await.unwrap();

        // Report of 500 fails: no reset
        assert_eq!(slice.read("k1").await.unwrap(), 500);

        slice.charge("k1", 10).await.unwrap();
        assert_eq!(slice.snapshot_and_reset("k1").await.unwrap(), 510);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_later_charges() {
        let slice = slice();
        slice.charge("k1", 500).await.unwrap();
        let reported = slice.read("k1").await.unwrap();

        // A charge arrives while the report is in flight
        slice.charge("k1", 25).await.unwrap();

        assert_eq!(slice.acknowledge("k1", reported).await.unwrap(), 25);
        assert_eq!(slice.read("k1").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_acknowledge_rejects_negative() {
        let slice = slice();
        assert!(matches!(
            slice.acknowledge("k1", -3).await,
            Err(MeterError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_charges_during_resets_are_not_lost() {
        let slice = slice();

        let charger = {
            let slice = slice.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    slice.charge("k1", 1).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let resetter = {
            let slice = slice.clone();
            tokio::spawn(async move {
                let mut taken = 0;
                for _ in 0..50 {
                    taken += slice.snapshot_and_reset("k1").await.unwrap();
                    tokio::task::yield_now().await;
                }
                taken
            })
        };

        charger.await.unwrap();
        let taken = resetter.await.unwrap();
        let remaining = slice.read("k1").await.unwrap();

        // Every charge lands in exactly one slice
        assert_eq!(taken + remaining, 200);
    }
}
