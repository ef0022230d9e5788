//! Database module - key-value storage for the meter
//!
//! [`KvStore`] is the only way the metering services touch persistent state.
//! Two implementations are provided:
//!
//! - [`SqliteStore`]: SQLx with SQLite, opened through [`Database`]
//! - [`MemoryStore`]: in-process, for tests and embedding

pub mod kv;
pub mod memory;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use kv::{parse_counter, KvStore, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::MeterConfig;
use crate::error::Result;

/// How long a connection waits on SQLite's write lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Open the database configured in `config`
    pub async fn new(config: &MeterConfig) -> Result<Self> {
        Self::open(config.db_path.clone()).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite:{}", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Key-value store over this database
    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.pool.clone())
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // Hash fields (records, counters, billing slices)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_hash (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Set members (key index, seen sets)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_set (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Expiration instants (unix seconds) for either kind of key
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_expiry (
                key TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expiry_expires_at ON kv_expiry(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
