//! Services module

pub mod billing;
pub mod metering;

pub use billing::{BillingProvider, BillingReconciler, HttpBillingProvider, ReconcileSummary};
pub use metering::{
    AuthResult, BillingSlice, CounterEngine, CounterKey, DenyReason, KeyAdmin, KeyStore,
    MeterError, Period, QuotaPolicy, RequestType, Scope, UsageAuthorizer, UsageCounter,
    UsageReport, UsageRequest,
};
