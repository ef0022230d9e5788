//! Billing reconciliation
//!
//! Moves accumulated billing slices to an external provider.
//!
//! ```text
//! BillingReconciler ──read──▶ BillingSlice
//!        │                        ▲
//!        │ report_usage()         │ acknowledge(reported)
//!        ▼                        │
//! trait BillingProvider ──ok──────┘
//!        │
//!        ▼
//! HttpBillingProvider
//! ```

pub mod http;
pub mod provider;
pub mod reconcile;

pub use http::HttpBillingProvider;
pub use provider::{BillingError, BillingProvider, CustomerAccount, CustomerStatus};
pub use reconcile::{
    billable_units, BillingReconciler, KeyReport, ReconcileSummary, ReportOutcome, SkipReason,
};
