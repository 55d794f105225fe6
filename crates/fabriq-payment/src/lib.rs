//! Payment intents for Fabriq services.
//!
//! A [`Provider`] creates and looks up payment intents with a gateway.
//! Errors convert into [`fabriq_core::MicroError`], so handlers can use `?`.
//!
//! ```
//! use fabriq_payment::{InMemoryProvider, IntentRequest, IntentStatus, Provider};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fabriq_payment::PaymentError> {
//! let provider = InMemoryProvider::new();
//! let intent = provider
//!     .create_intent(&IntentRequest::new(25.0, "eur").with_payment_method_type("card"))
//!     .await?;
//! assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
//! # Ok(())
//! # }
//! ```

mod error;
mod intent;
mod provider;

pub use error::PaymentError;
pub use intent::{IntentRequest, IntentResponse, IntentStatus};
pub use provider::{InMemoryProvider, Provider};
