//! Metering error types

use thiserror::Error;

use crate::db::StoreError;

/// Errors that can occur while metering usage
///
/// Quota denials are not errors; they come back as a denied
/// [`super::AuthResult`].
#[derive(Error, Debug)]
pub enum MeterError {
    /// The API key does not exist in the store
    #[error("API key not found: {0}")]
    KeyNotFound(String),

    /// The backing store failed; the current request must fail closed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record could not be decoded
    #[error("Invalid record for {api_key}: {reason}")]
    InvalidRecord { api_key: String, reason: String },

    /// The caller passed something the meter cannot account for
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The external billing provider rejected or failed a call
    #[error("Billing error: {0}")]
    Billing(String),
}

impl MeterError {
    /// Whether the caller may retry the whole request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeterError::StoreUnavailable(_) | MeterError::Billing(_))
    }
}

impl From<StoreError> for MeterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => MeterError::StoreUnavailable(msg),
            corrupt @ StoreError::Corrupt { .. } => {
                MeterError::StoreUnavailable(corrupt.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_fail_closed() {
        let err: MeterError = StoreError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, MeterError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let err: MeterError = StoreError::Corrupt {
            key: "k".to_string(),
            field: "characters".to_string(),
            value: "x".to_string(),
        }
        .into();
        assert!(matches!(err, MeterError::StoreUnavailable(_)));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            MeterError::KeyNotFound("abc".to_string()).to_string(),
            "API key not found: abc"
        );
        assert!(!MeterError::KeyNotFound("abc".to_string()).is_retryable());
    }
}
