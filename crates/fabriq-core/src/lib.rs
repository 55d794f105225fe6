//! # Fabriq Core
//!
//! Core types shared by every Fabriq crate.
//!
//! - [`Authentication`] - Immutable snapshot of the caller (tenant, user, roles, claims)
//! - [`Ctx`] - Per-request context with a transactional scope
//! - [`RequestId`] - Request identifier, generated as UUID v7 or taken from the caller
//! - [`MicroError`] - The six-kind error taxonomy and its HTTP mapping
//! - [`HandlerError`] - What handlers and filters return on failure
//! - [`scheduler::Scheduler`] - Context-aware periodic job contract

#![doc(html_root_url = "https://docs.rs/fabriq-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
mod context;
mod error;
pub mod scheduler;
pub mod tx;

pub use auth::{Authentication, ClaimError, TokenInfo, DEFAULT_TENANT_ID, TENANT_HEADER};
pub use context::{Ctx, RequestId};
pub use error::{
    ErrorCategory, ErrorResponse, FieldErrors, HandlerError, HandlerResult, MicroError,
    MicroResult,
};
pub use tx::{NoopTransactions, Transaction, TransactionManager, TxFuture};
