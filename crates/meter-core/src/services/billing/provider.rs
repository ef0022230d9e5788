//! Billing provider trait and error types
//!
//! Defines the interface the reconciliation job uses to read customer plans
//! and report usage to an external billing provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::metering::MeterError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when talking to a billing provider
#[derive(Error, Debug)]
pub enum BillingError {
    /// Provider settings are missing
    #[error("Billing provider not configured: {0}")]
    NotConfigured(String),

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The provider has no such customer
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    /// API returned an error
    #[error("API error: {0}")]
    ApiError(String),

    /// Failed to parse API response
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::NetworkError("Request timed out".to_string())
        } else if err.is_connect() {
            BillingError::NetworkError("Connection failed".to_string())
        } else if err.is_decode() {
            BillingError::ParseError(err.to_string())
        } else {
            match err.status() {
                Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                    BillingError::Unauthorized(format!("HTTP {}", status))
                }
                Some(status) => BillingError::ApiError(format!("HTTP {}", status)),
                None => BillingError::NetworkError(err.to_string()),
            }
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::ParseError(err.to_string())
    }
}

impl From<BillingError> for MeterError {
    fn from(err: BillingError) -> Self {
        MeterError::Billing(err.to_string())
    }
}

// ============================================================================
// Customer Types
// ============================================================================

/// Subscription state at the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Canceled,
}

/// A customer's plan and usage in billing units for the current cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAccount {
    pub code: String,
    pub status: CustomerStatus,
    /// Units included in the plan
    pub quota_units: f64,
    /// Units already reported this cycle
    pub used_units: f64,
    pub overage_allowed: bool,
}

impl CustomerAccount {
    pub fn is_canceled(&self) -> bool {
        self.status == CustomerStatus::Canceled
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// An external billing provider
///
/// Reports are at-least-once: a call that fails after the provider applied it
/// may be repeated by the next reconciliation run.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Short identifier used in logs
    fn provider_id(&self) -> &'static str;

    /// Current plan and usage of a customer
    async fn get_customer(&self, customer_code: &str) -> Result<CustomerAccount, BillingError>;

    /// Add `units` to the customer's usage; returns the updated account
    async fn report_usage(
        &self,
        customer_code: &str,
        units: f64,
    ) -> Result<CustomerAccount, BillingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_account_json() {
        let json = r#"{
            "code": "cust-1",
            "status": "canceled",
            "quota_units": 250.0,
            "used_units": 12.5,
            "overage_allowed": false
        }"#;
        let account: CustomerAccount = serde_json::from_str(json).unwrap();
        assert!(account.is_canceled());
        assert_eq!(account.used_units, 12.5);
    }

    #[test]
    fn test_billing_error_into_meter_error() {
        let err: MeterError = BillingError::NetworkError("Connection failed".to_string()).into();
        assert!(matches!(err, MeterError::Billing(_)));
        assert!(err.is_retryable());
    }
}
