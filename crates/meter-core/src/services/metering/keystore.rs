//! API key lookup
//!
//! Read-only access to [`ApiKeyRecord`]s. Mutations belong to the
//! administrative paths in [`super::admin`].

use std::sync::Arc;

use super::error::MeterError;
use super::layout::KeyLayout;
use crate::db::KvStore;
use crate::models::{ApiKeyRecord, KeyType};

/// Resolves API key strings to records
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn KvStore>,
    layout: KeyLayout,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KvStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Look up the record for `api_key`
    ///
    /// # Errors
    /// - `KeyNotFound` if the key was never issued or has been removed
    /// - `InvalidRecord` if the stored hash cannot be decoded
    /// - `StoreUnavailable` if the store fails
    pub async fn resolve(&self, api_key: &str) -> Result<ApiKeyRecord, MeterError> {
        if api_key.is_empty() {
            return Err(MeterError::KeyNotFound(String::new()));
        }

        let fields = self.store.get_fields(&self.layout.record(api_key)).await?;
        if fields.is_empty() {
            return Err(MeterError::KeyNotFound(api_key.to_string()));
        }

        ApiKeyRecord::from_fields(api_key, &fields).map_err(|reason| MeterError::InvalidRecord {
            api_key: api_key.to_string(),
            reason,
        })
    }

    /// Every issued key of one tier, sorted
    pub async fn list(&self, key_type: KeyType) -> Result<Vec<String>, MeterError> {
        Ok(self
            .store
            .members(&self.layout.key_index(key_type))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::KeyStatus;

    async fn seed(store: &MemoryStore, layout: &KeyLayout, record: &ApiKeyRecord) {
        store
            .set_fields(&layout.record(&record.api_key), &record.to_fields())
            .await
            .unwrap();
        store
            .add_member(&layout.key_index(record.key_type), &record.api_key, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_existing_key() {
        let store = Arc::new(MemoryStore::new());
        let layout = KeyLayout::default();
        let record = ApiKeyRecord::new("k1", KeyType::Trial, "a@b.c", 1000)
            .with_status(KeyStatus::Canceled);
        seed(&store, &layout, &record).await;

        let keys = KeyStore::new(store, layout);
        assert_eq!(keys.resolve("k1").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_resolve_missing_key() {
        let keys = KeyStore::new(Arc::new(MemoryStore::new()), KeyLayout::default());
        assert!(matches!(
            keys.resolve("nope").await,
            Err(MeterError::KeyNotFound(k)) if k == "nope"
        ));
        assert!(matches!(
            keys.resolve("").await,
            Err(MeterError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_invalid_record() {
        let store = Arc::new(MemoryStore::new());
        let layout = KeyLayout::default();
        store
            .set_fields(&layout.record("k1"), &[("key_type", "platinum".to_string())])
            .await
            .unwrap();

        let keys = KeyStore::new(store, layout);
        assert!(matches!(
            keys.resolve("k1").await,
            Err(MeterError::InvalidRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_by_type() {
        let store = Arc::new(MemoryStore::new());
        let layout = KeyLayout::default();
        seed(&store, &layout, &ApiKeyRecord::new("m2", KeyType::MeteredSubscriber, "x@y.z", 5)).await;
        seed(&store, &layout, &ApiKeyRecord::new("m1", KeyType::MeteredSubscriber, "x@y.z", 5)).await;
        seed(&store, &layout, &ApiKeyRecord::new("t1", KeyType::Trial, "x@y.z", 5)).await;

        let keys = KeyStore::new(store, layout);
        assert_eq!(
            keys.list(KeyType::MeteredSubscriber).await.unwrap(),
            vec!["m1", "m2"]
        );
        assert!(keys.list(KeyType::LifetimeGrant).await.unwrap().is_empty());
    }
}
