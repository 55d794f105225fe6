//! Payment error types.

use thiserror::Error;

use fabriq_core::{HandlerError, MicroError};

/// Errors returned by payment providers.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The request was rejected before reaching the provider.
    #[error("invalid payment request: {field} {reason}")]
    InvalidRequest {
        /// Offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No intent with the given id.
    #[error("payment intent not found: {0}")]
    NotFound(String),

    /// The provider failed or is unreachable.
    #[error("payment provider error: {0}")]
    Provider(String),
}

impl PaymentError {
    /// Creates an invalid request error.
    pub fn invalid_request(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<PaymentError> for MicroError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::InvalidRequest { field, reason } => {
                let mut details = serde_json::Map::new();
                details.insert(field.clone(), reason.clone().into());
                MicroError::functional("payment.invalid_request", err.to_string())
                    .with_details(details)
            }
            PaymentError::NotFound(_) => {
                MicroError::not_found("payment.intent_not_found", err.to_string())
            }
            PaymentError::Provider(_) => {
                MicroError::technical("payment.provider", err.to_string())
            }
        }
    }
}

impl From<PaymentError> for HandlerError {
    fn from(err: PaymentError) -> Self {
        Self::Micro(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabriq_core::ErrorCategory;

    #[test]
    fn test_maps_to_categories() {
        let err: MicroError = PaymentError::invalid_request("amount", "must be positive").into();
        assert_eq!(err.category(), ErrorCategory::Functional);
        assert_eq!(
            err.details(),
            Some(&serde_json::json!({"amount": "must be positive"}))
        );

        let err: MicroError = PaymentError::NotFound("pi_9".into()).into();
        assert_eq!(err.status_code().as_u16(), 404);

        let err: MicroError = PaymentError::Provider("timeout".into()).into();
        assert_eq!(err.category(), ErrorCategory::Technical);
    }
}
