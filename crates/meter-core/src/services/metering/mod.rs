//! Usage metering and quota enforcement
//!
//! Attributes every billable request to an API key, rolls it up into several
//! time windows, decides whether the request may proceed, and accumulates the
//! usage still to be reported for billing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ UsageAuthorizer                                         │
//! │   - authorize(UsageRequest) -> AuthResult               │
//! └─────────────────────────────────────────────────────────┘
//!     │             │               │              │
//!     ▼             ▼               ▼              ▼
//! ┌────────┐  ┌───────────┐  ┌─────────────┐  ┌────────────┐
//! │KeyStore│  │QuotaPolicy│  │CounterEngine│  │BillingSlice│
//! │resolve │  │decide     │  │charge/read  │  │charge/reset│
//! └────────┘  └───────────┘  └─────────────┘  └────────────┘
//!     │          (pure)             │              │
//!     └─────────────────┬───────────┴──────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ trait KvStore (atomic single-key primitives)            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use meter_core::services::metering::{RequestType, UsageAuthorizer, UsageRequest};
//!
//! let authorizer = UsageAuthorizer::new(store, &config);
//! let request = UsageRequest::new(api_key, "Azure", RequestType::Translation, 42);
//!
//! let result = authorizer.authorize(&request).await?;
//! if !result.allowed {
//!     // reason string goes back to the client verbatim
//!     return Err(reject(result.deny_reason));
//! }
//! ```

pub mod admin;
pub mod authorizer;
pub mod counter;
pub mod error;
pub mod keystore;
pub mod layout;
pub mod policy;
pub mod report;
pub mod slice;
pub mod tracking;
pub mod types;

pub use admin::{generate_api_key, KeyAdmin, TrialIssuance};
pub use authorizer::{AuthResult, UsageAuthorizer, UsageRequest};
pub use counter::CounterEngine;
pub use error::MeterError;
pub use keystore::KeyStore;
pub use layout::{KeyLayout, ALL_MARKER};
pub use policy::{Decision, DenyReason, QuotaPolicy};
pub use report::{UsageFilter, UsageReport, UsageRow};
pub use slice::BillingSlice;
pub use tracking::{SeenDimensions, UsageTracker};
pub use types::{CounterKey, Period, RequestType, Scope, UsageCounter};
