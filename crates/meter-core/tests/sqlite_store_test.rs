//! Integration tests for the SQLite-backed store and the metering services on top of it

use std::sync::Arc;

use chrono::{Duration, Utc};
use meter_core::db::{Database, KvStore};
use meter_core::services::metering::{
    BillingSlice, CounterEngine, CounterKey, DenyReason, KeyAdmin, KeyLayout, Period,
    QuotaPolicy, RequestType, UsageAuthorizer, UsageCounter, UsageRequest,
};
use meter_core::{ApiKeyRecord, KeyType, MeterConfig};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::open(db_path).await.expect("Failed to create test database");
    (db, temp_dir)
}

fn store(db: &Database) -> Arc<dyn KvStore> {
    Arc::new(db.store())
}

#[tokio::test]
async fn test_hash_round_trip_and_increment() {
    let (db, _temp_dir) = create_test_db().await;
    let store = store(&db);

    store
        .set_fields("h", &[("a", "1".to_string()), ("b", "x".to_string())])
        .await
        .unwrap();
    assert_eq!(store.incr_field("h", "a", 41, None).await.unwrap(), 42);
    assert_eq!(store.incr_field("h", "new", -3, None).await.unwrap(), -3);

    let fields = store.get_fields("h").await.unwrap();
    assert_eq!(fields.get("a").map(String::as_str), Some("42"));
    assert_eq!(fields.get("b").map(String::as_str), Some("x"));
    assert_eq!(fields.get("new").map(String::as_str), Some("-3"));
}

#[tokio::test]
async fn test_zero_ttl_expires_immediately() {
    let (db, _temp_dir) = create_test_db().await;
    let store = store(&db);

    store
        .incr_field("short", "n", 5, Some(Duration::zero()))
        .await
        .unwrap();
    assert!(store.get_fields("short").await.unwrap().is_empty());
    assert!(store.keys_with_prefix("sho").await.unwrap().is_empty());

    // Writing again starts from scratch
    assert_eq!(store.incr_field("short", "n", 1, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_compare_and_set() {
    let (db, _temp_dir) = create_test_db().await;
    let store = store(&db);

    assert!(store.compare_and_set_field("c", "v", 0, 7).await.unwrap());
    assert!(!store.compare_and_set_field("c", "v", 0, 9).await.unwrap());
    assert!(store.compare_and_set_field("c", "v", 7, 0).await.unwrap());
    assert_eq!(
        store.get_fields("c").await.unwrap().get("v").map(String::as_str),
        Some("0")
    );
}

#[tokio::test]
async fn test_sets_prefix_scan_and_delete() {
    let (db, _temp_dir) = create_test_db().await;
    let store = store(&db);

    assert!(store.add_member("p:set", "b", None).await.unwrap());
    assert!(store.add_member("p:set", "a", None).await.unwrap());
    assert!(!store.add_member("p:set", "a", None).await.unwrap());
    store.incr_field("p:hash", "n", 1, None).await.unwrap();
    store.incr_field("q:hash", "n", 1, None).await.unwrap();

    assert_eq!(store.members("p:set").await.unwrap(), vec!["a", "b"]);
    assert_eq!(
        store.keys_with_prefix("p:").await.unwrap(),
        vec!["p:hash", "p:set"]
    );

    assert!(store.remove_member("p:set", "b").await.unwrap());
    assert!(!store.remove_member("p:set", "b").await.unwrap());
    assert_eq!(store.members("p:set").await.unwrap(), vec!["a"]);

    assert!(store.delete("p:set").await.unwrap());
    assert!(!store.delete("p:set").await.unwrap());
    assert!(store.members("p:set").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_charges_on_sqlite() {
    let (db, _temp_dir) = create_test_db().await;
    let engine = CounterEngine::new(store(&db), &MeterConfig::default());
    let key = CounterKey::user(Period::Daily, Utc::now(), "k1", "Azure", RequestType::Audio);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            engine.charge(&key, 2).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        engine.read(&key).await.unwrap(),
        UsageCounter {
            characters: 100,
            requests: 50
        }
    );
}

#[tokio::test]
async fn test_authorize_end_to_end() {
    let (db, _temp_dir) = create_test_db().await;
    let store = store(&db);
    let config = MeterConfig::default();

    let admin = KeyAdmin::new(store.clone(), KeyLayout::default());
    let record = admin.issue(KeyType::Trial, "e2e@example.com", 1000).await.unwrap();
    let authorizer = UsageAuthorizer::new(store.clone(), &config);

    let limiting = QuotaPolicy::limiting_key(&record, Utc::now());
    authorizer.counters().charge(&limiting, 950).await.unwrap();

    let request = UsageRequest::new(&record.api_key, "Azure", RequestType::Translation, 40);
    let allowed = authorizer.authorize(&request).await.unwrap();
    assert!(allowed.allowed);

    let denied = authorizer.authorize(&request).await.unwrap();
    assert_eq!(denied.deny_reason, Some(DenyReason::QuotaExceeded));
    assert_eq!(authorizer.counters().read(&limiting).await.unwrap().characters, 990);

    let slice = BillingSlice::new(store, KeyLayout::default());
    assert_eq!(slice.snapshot_and_reset(&record.api_key).await.unwrap(), 40);
    assert_eq!(slice.read(&record.api_key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let record = ApiKeyRecord::new("persist1", KeyType::LifetimeGrant, "p@example.com", 0)
        .with_expiration(Utc::now() + Duration::days(365));
    {
        let db = Database::open(db_path.clone()).await.unwrap();
        KeyAdmin::new(store(&db), KeyLayout::default())
            .save(&record)
            .await
            .unwrap();
        db.pool.close().await;
    }

    let db = Database::open(db_path).await.unwrap();
    let keys = meter_core::KeyStore::new(store(&db), KeyLayout::default());
    assert_eq!(keys.resolve("persist1").await.unwrap(), record);
}
