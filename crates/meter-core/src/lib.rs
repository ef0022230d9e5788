//! # meter-core
//!
//! Usage metering and quota enforcement for a per-key billed API.
//!
//! This crate provides:
//! - Key-value store abstraction with SQLite and in-memory backends (`db` module)
//! - API key records (`models` module)
//! - Metering, quota decisions and billing reconciliation (`services` module)
//! - Environment configuration (`config` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

// Re-exports for convenience
pub use config::MeterConfig;
pub use db::{Database, KvStore, MemoryStore, SqliteStore};
pub use error::{Error, Result};

pub use models::{ApiKeyRecord, KeyStatus, KeyType};

pub use services::{
    AuthResult, BillingProvider, BillingReconciler, BillingSlice, CounterEngine, CounterKey,
    DenyReason, HttpBillingProvider, KeyAdmin, KeyStore, MeterError, Period, QuotaPolicy,
    ReconcileSummary, RequestType, Scope, UsageAuthorizer, UsageCounter, UsageReport,
    UsageRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
