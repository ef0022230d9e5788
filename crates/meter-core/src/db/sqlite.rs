//! SQLite-backed key-value store
//!
//! Each [`KvStore`] primitive maps onto a single SQL statement, so SQLite's
//! own write lock gives the per-key atomicity the meter relies on. Values are
//! stored as text and cast for arithmetic.
//!
//! Expired keys are filtered out of every read and purged lazily by the next
//! write to the same key.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::kv::{KvStore, StoreError};

/// Key-value store persisted in the `kv_*` tables
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given database pool
    ///
    /// The pool must come from [`super::Database`], which creates the tables.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop `key` if its expiration has passed
    ///
    /// Bucket keys roll over by name long before they expire, so nothing
    /// writes to a key around its expiry instant.
    async fn purge_if_expired(&self, key: &str, now: i64) -> Result<(), StoreError> {
        let expired: Option<i64> = sqlx::query_scalar(
            "SELECT expires_at FROM kv_expiry WHERE key = ? AND expires_at <= ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if expired.is_some() {
            log::debug!("[meter:store] Purging expired key {}", key);
            sqlx::query("DELETE FROM kv_hash WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM kv_set WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM kv_expiry WHERE key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn set_expiry_if_absent(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if let Some(ttl) = ttl {
            let expires_at = (Utc::now() + ttl).timestamp();
            sqlx::query(
                "INSERT INTO kv_expiry (key, expires_at) VALUES (?, ?) ON CONFLICT(key) DO NOTHING",
            )
            .bind(key)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT field, value FROM kv_hash
            WHERE key = ?1
              AND NOT EXISTS (
                  SELECT 1 FROM kv_expiry WHERE key = ?1 AND expires_at <= ?2
              )
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.purge_if_expired(key, Utc::now().timestamp()).await?;

        let mut tx = self.pool.begin().await?;
        for (field, value) in fields {
            sqlx::query(
                r#"
                INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
                ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(*field)
            .bind(value.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn incr_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        self.purge_if_expired(key, Utc::now().timestamp()).await?;

        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?1, ?2, CAST(?3 AS TEXT))
            ON CONFLICT(key, field) DO UPDATE
                SET value = CAST(CAST(kv_hash.value AS INTEGER) + ?3 AS TEXT)
            RETURNING CAST(value AS INTEGER)
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;

        self.set_expiry_if_absent(key, ttl).await?;
        Ok(value)
    }

    async fn compare_and_set_field(
        &self,
        key: &str,
        field: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE kv_hash SET value = CAST(?4 AS TEXT)
            WHERE key = ?1 AND field = ?2 AND CAST(value AS INTEGER) = ?3
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(expected)
        .bind(new)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }
        if expected != 0 {
            return Ok(false);
        }

        // A missing field counts as zero
        let inserted = sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?, ?, CAST(? AS TEXT))
            ON CONFLICT(key, field) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(new)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.purge_if_expired(key, Utc::now().timestamp()).await?;

        let inserted = sqlx::query(
            "INSERT INTO kv_set (key, member) VALUES (?, ?) ON CONFLICT(key, member) DO NOTHING",
        )
        .bind(key)
        .bind(member)
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.set_expiry_if_absent(key, ttl).await?;
        Ok(inserted == 1)
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.purge_if_expired(key, Utc::now().timestamp()).await?;

        let removed = sqlx::query("DELETE FROM kv_set WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed == 1)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT member FROM kv_set
            WHERE key = ?1
              AND NOT EXISTS (
                  SELECT 1 FROM kv_expiry WHERE key = ?1 AND expires_at <= ?2
              )
            ORDER BY member
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT key FROM (
                SELECT key FROM kv_hash WHERE substr(key, 1, length(?1)) = ?1
                UNION
                SELECT key FROM kv_set WHERE substr(key, 1, length(?1)) = ?1
            ) AS k
            WHERE NOT EXISTS (
                SELECT 1 FROM kv_expiry e WHERE e.key = k.key AND e.expires_at <= ?2
            )
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .bind(Utc::now().timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut removed = 0;
        for table in ["kv_hash", "kv_set", "kv_expiry"] {
            removed += sqlx::query(&format!("DELETE FROM {} WHERE key = ?", table))
                .bind(key)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(removed > 0)
    }
}
