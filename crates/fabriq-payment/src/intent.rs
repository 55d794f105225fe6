//! Payment intent data model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for a payment method.
    RequiresPaymentMethod,
    /// Waiting for confirmation.
    RequiresConfirmation,
    /// Waiting for customer action such as 3-D Secure.
    RequiresAction,
    /// Authorized; waiting for capture.
    RequiresCapture,
    /// Paid.
    Succeeded,
    /// Being processed by the provider.
    Processing,
    /// Canceled; no further changes.
    Canceled,
}

impl IntentStatus {
    /// All statuses.
    pub const ALL: [Self; 7] = [
        Self::RequiresPaymentMethod,
        Self::RequiresConfirmation,
        Self::RequiresAction,
        Self::RequiresCapture,
        Self::Succeeded,
        Self::Processing,
        Self::Canceled,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::RequiresCapture => "requires_capture",
            Self::Succeeded => "succeeded",
            Self::Processing => "processing",
            Self::Canceled => "canceled",
        }
    }

    /// Returns `true` for states that never change again.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PaymentError::invalid_request("status", format!("unknown status {s:?}")))
    }
}

/// Request to create a payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Amount in major currency units.
    pub amount: f64,
    /// ISO 4217 currency code, e.g. `"usd"`.
    pub currency: String,
    /// Statement description.
    #[serde(default)]
    pub description: String,
    /// Accepted payment method types, e.g. `["card"]`.
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    /// Receipt address.
    #[serde(default)]
    pub customer_email: String,
}

impl IntentRequest {
    /// Creates a request for `amount` in `currency`.
    #[must_use]
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            description: String::new(),
            payment_method_types: Vec::new(),
            customer_email: String::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds an accepted payment method type.
    #[must_use]
    pub fn with_payment_method_type(mut self, method: impl Into<String>) -> Self {
        self.payment_method_types.push(method.into());
        self
    }

    /// Sets the customer email.
    #[must_use]
    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = email.into();
        self
    }

    /// Checks the fields every provider needs.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidRequest`] for a non-positive or
    /// non-finite amount, or a currency that is not three ASCII letters.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(PaymentError::invalid_request("amount", "must be a positive number"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::invalid_request(
                "currency",
                "must be a three-letter ISO 4217 code",
            ));
        }
        Ok(())
    }
}

/// A payment intent as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResponse {
    /// Provider-assigned id.
    pub id: String,
    /// Secret handed to the client to complete payment.
    pub client_secret: String,
    /// Current status.
    pub status: IntentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        for status in IntentStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, json!(status.as_str()));
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
            assert_eq!(status.to_string(), status.as_str());
        }
        assert!("refunded".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn test_final_states() {
        let finals: Vec<_> = IntentStatus::ALL.into_iter().filter(|s| s.is_final()).collect();
        assert_eq!(finals, [IntentStatus::Succeeded, IntentStatus::Canceled]);
    }

    #[test]
    fn test_request_validation() {
        assert!(IntentRequest::new(10.5, "usd").validate().is_ok());
        assert!(IntentRequest::new(0.0, "usd").validate().is_err());
        assert!(IntentRequest::new(f64::NAN, "usd").validate().is_err());
        assert!(IntentRequest::new(1.0, "dollars").validate().is_err());
        assert!(IntentRequest::new(1.0, "u5d").validate().is_err());
    }

    #[test]
    fn test_request_defaults_when_deserializing() {
        let request: IntentRequest =
            serde_json::from_value(json!({"amount": 12.0, "currency": "eur"})).unwrap();
        assert_eq!(request, IntentRequest::new(12.0, "eur"));
    }

    #[test]
    fn test_response_shape() {
        let response = IntentResponse {
            id: "pi_1".to_string(),
            client_secret: "pi_1_secret".to_string(),
            status: IntentStatus::RequiresPaymentMethod,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": "pi_1", "client_secret": "pi_1_secret", "status": "requires_payment_method"})
        );
    }
}
