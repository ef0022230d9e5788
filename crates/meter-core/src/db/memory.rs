//! In-process key-value store
//!
//! Implements [`KvStore`] on top of a single `RwLock`, so every primitive is
//! trivially atomic. Used by tests and by embedders that do not need
//! persistence.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::kv::{KvStore, StoreError};

/// A value with an optional expiration instant
#[derive(Debug, Default)]
struct Expiring<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Expiring<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
    sets: HashMap<String, Expiring<BTreeSet<String>>>,
}

impl Inner {
    /// Live hash entry for `key`, dropping it first if it has expired
    fn live_hash(&mut self, key: &str, now: DateTime<Utc>) -> &mut Expiring<HashMap<String, String>> {
        if self.hashes.get(key).is_some_and(|e| e.is_expired(now)) {
            self.hashes.remove(key);
        }
        self.hashes.entry(key.to_string()).or_default()
    }

    fn live_set(&mut self, key: &str, now: DateTime<Utc>) -> &mut Expiring<BTreeSet<String>> {
        if self.sets.get(key).is_some_and(|e| e.is_expired(now)) {
            self.sets.remove(key);
        }
        self.sets.entry(key.to_string()).or_default()
    }
}

/// Key-value store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_field(key: &str, field: &str, raw: &str) -> Result<i64, StoreError> {
    raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        field: field.to_string(),
        value: raw.to_string(),
    })
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        let now = Utc::now();
        Ok(inner
            .hashes
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
            .unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_hash(key, Utc::now());
        for (field, value) in fields {
            entry.value.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn incr_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let entry = inner.live_hash(key, now);

        let current = match entry.value.get(field) {
            Some(raw) => parse_field(key, field, raw)?,
            None => 0,
        };
        let updated = current + delta;
        entry.value.insert(field.to_string(), updated.to_string());

        if let (Some(ttl), None) = (ttl, entry.expires_at) {
            entry.expires_at = Some(now + ttl);
        }

        Ok(updated)
    }

    async fn compare_and_set_field(
        &self,
        key: &str,
        field: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_hash(key, Utc::now());

        let current = match entry.value.get(field) {
            Some(raw) => parse_field(key, field, raw)?,
            None => 0,
        };
        if current != expected {
            return Ok(false);
        }
        entry.value.insert(field.to_string(), new.to_string());
        Ok(true)
    }

    async fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let entry = inner.live_set(key, now);
        let added = entry.value.insert(member.to_string());
        if let (Some(ttl), None) = (ttl, entry.expires_at) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(added)
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner.live_set(key, Utc::now());
        Ok(entry.value.remove(member))
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let now = Utc::now();
        Ok(inner
            .sets
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let now = Utc::now();

        let hash_keys = inner
            .hashes
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now) && !e.value.is_empty())
            .map(|(k, _)| k.clone());
        let set_keys = inner
            .sets
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now) && !e.value.is_empty())
            .map(|(k, _)| k.clone());

        let keys: BTreeSet<String> = hash_keys.chain(set_keys).collect();
        Ok(keys.into_iter().collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let removed_hash = inner.hashes.remove(key).is_some();
        let removed_set = inner.sets.remove(key).is_some();
        Ok(removed_hash || removed_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_incr_creates_field() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_field("k", "characters", 5, None).await.unwrap(), 5);
        assert_eq!(store.incr_field("k", "characters", 7, None).await.unwrap(), 12);

        let fields = store.get_fields("k").await.unwrap();
        assert_eq!(fields.get("characters").map(String::as_str), Some("12"));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let store = MemoryStore::new();
        store
            .incr_field("k", "requests", 1, Some(Duration::zero()))
            .await
            .unwrap();

        assert!(store.get_fields("k").await.unwrap().is_empty());
        assert!(store.keys_with_prefix("k").await.unwrap().is_empty());
        // An increment after expiry starts from scratch
        assert_eq!(store.incr_field("k", "requests", 1, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ttl_is_not_extended() {
        let store = MemoryStore::new();
        store
            .incr_field("k", "requests", 1, Some(Duration::days(2)))
            .await
            .unwrap();
        let first = store.inner.read().await.hashes["k"].expires_at;

        store
            .incr_field("k", "requests", 1, Some(Duration::days(30)))
            .await
            .unwrap();
        let second = store.inner.read().await.hashes["k"].expires_at;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        // missing field compares as zero
        assert!(store.compare_and_set_field("k", "characters", 0, 3).await.unwrap());
        assert!(!store.compare_and_set_field("k", "characters", 0, 9).await.unwrap());
        assert!(store.compare_and_set_field("k", "characters", 3, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        assert!(store.add_member("s", "b", None).await.unwrap());
        assert!(store.add_member("s", "a", None).await.unwrap());
        assert!(!store.add_member("s", "a", None).await.unwrap());
        assert_eq!(store.members("s").await.unwrap(), vec!["a", "b"]);
        assert!(store.members("missing").await.unwrap().is_empty());

        assert!(store.remove_member("s", "a").await.unwrap());
        assert!(!store.remove_member("s", "a").await.unwrap());
        assert_eq!(store.members("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_keys_with_prefix_and_delete() {
        let store = MemoryStore::new();
        store.incr_field("clt:usage:a", "requests", 1, None).await.unwrap();
        store.incr_field("clt:usage:b", "requests", 1, None).await.unwrap();
        store.add_member("clt:user:client:x", "anki", None).await.unwrap();

        assert_eq!(
            store.keys_with_prefix("clt:usage:").await.unwrap(),
            vec!["clt:usage:a", "clt:usage:b"]
        );
        assert!(store.delete("clt:usage:a").await.unwrap());
        assert!(!store.delete("clt:usage:a").await.unwrap());
        assert_eq!(store.keys_with_prefix("clt:").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.incr_field("k", "characters", 1, None).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let fields = store.get_fields("k").await.unwrap();
        assert_eq!(fields["characters"], "100");
    }
}
