//! Payment provider contract.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::intent::{IntentRequest, IntentResponse, IntentStatus};

/// A payment gateway able to create and look up payment intents.
///
/// Implementations must be thread-safe; services usually hold one as
/// `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Creates an intent for `request`.
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentResponse, PaymentError>;

    /// Fetches an intent by id.
    async fn get_intent(&self, id: &str) -> Result<IntentResponse, PaymentError>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentResponse, PaymentError> {
        (**self).create_intent(request).await
    }

    async fn get_intent(&self, id: &str) -> Result<IntentResponse, PaymentError> {
        (**self).get_intent(id).await
    }
}

/// In-process provider for development and tests.
///
/// New intents start in [`IntentStatus::RequiresPaymentMethod`];
/// [`set_status`](Self::set_status) simulates provider-side transitions.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    intents: DashMap<String, IntentResponse>,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an intent to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::NotFound`] for an unknown id, and
    /// [`PaymentError::InvalidRequest`] if the intent is already final.
    pub fn set_status(&self, id: &str, status: IntentStatus) -> Result<(), PaymentError> {
        let mut intent = self
            .intents
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if intent.status.is_final() {
            return Err(PaymentError::invalid_request(
                "status",
                format!("intent is already {}", intent.status),
            ));
        }
        intent.status = status;
        Ok(())
    }

    /// Returns the number of stored intents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    /// Returns `true` if no intents exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentResponse, PaymentError> {
        request.validate()?;

        let id = format!("pi_{}", Uuid::now_v7().simple());
        let intent = IntentResponse {
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            id: id.clone(),
            status: IntentStatus::RequiresPaymentMethod,
        };
        self.intents.insert(id.clone(), intent.clone());

        info!(intent_id = %id, amount = request.amount, currency = %request.currency, "created payment intent");
        Ok(intent)
    }

    async fn get_intent(&self, id: &str) -> Result<IntentResponse, PaymentError> {
        self.intents
            .get(id)
            .map(|intent| intent.clone())
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IntentRequest {
        IntentRequest::new(49.99, "usd")
            .with_description("Pro plan")
            .with_payment_method_type("card")
            .with_customer_email("ada@example.com")
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let provider = InMemoryProvider::new();
        let created = provider.create_intent(&request()).await.unwrap();

        assert!(created.id.starts_with("pi_"));
        assert!(created.client_secret.starts_with(&created.id));
        assert_eq!(created.status, IntentStatus::RequiresPaymentMethod);

        let fetched = provider.get_intent(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_stored() {
        let provider = InMemoryProvider::new();
        let err = provider
            .create_intent(&IntentRequest::new(-1.0, "usd"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest { .. }));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let provider = InMemoryProvider::new();
        assert!(matches!(
            provider.get_intent("pi_missing").await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let provider = InMemoryProvider::new();
        let id = provider.create_intent(&request()).await.unwrap().id;

        provider.set_status(&id, IntentStatus::Processing).unwrap();
        provider.set_status(&id, IntentStatus::Succeeded).unwrap();
        assert_eq!(
            provider.get_intent(&id).await.unwrap().status,
            IntentStatus::Succeeded
        );
        assert!(provider.set_status(&id, IntentStatus::Canceled).is_err());
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let provider: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
        let created = provider.create_intent(&request()).await.unwrap();
        assert_eq!(provider.get_intent(&created.id).await.unwrap().id, created.id);
    }
}
