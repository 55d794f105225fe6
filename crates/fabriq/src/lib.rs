//! # Fabriq
//!
//! **Tenant-aware micro-service framework on hyper**
//!
//! Fabriq gives a service one contract for everything that crosses the wire:
//!
//! - **Typed handlers** - `async fn(Ctx, Input) -> Result<T, E>`, bound and validated for you
//! - **Tenant-aware auth** - every request carries an immutable [`core::Authentication`]
//! - **Six error kinds** - functional, technical, forbidden, unauthorized, not found, conflict
//! - **Router facade** - GET/POST/PUT/PATCH/DELETE, groups and route filters
//! - **Transactions** - each handler runs inside `ctx.tx`, committed on success
//! - **Scheduling** - periodic jobs with or without a context
//! - **Payments** - a provider contract for payment intents
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fabriq::prelude::*;
//!
//! async fn whoami(ctx: Ctx) -> HandlerResult<String> {
//!     Ok(ctx.user_id().to_string())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new()
//!         .with_optional_file("fabriq.toml")?
//!         .with_env_prefix(fabriq::config::DEFAULT_ENV_PREFIX)
//!         .load()?;
//!     init_logging(&config.logging_config()?)?;
//!
//!     let mut router = Router::new();
//!     router.get("/me", whoami).filter(filters::authenticated());
//!
//!     let mut builder = Server::builder()
//!         .config(config.server_config()?)
//!         .router(router);
//!     if let Some(verifier) = config.jwt_verifier() {
//!         builder = builder.token_verifier(verifier);
//!     }
//!     builder.build().run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! Request → /health | CORS → Auth → Route → Filters → Bind → Validate → ctx.tx(Handler)
//!                                                                           ↓
//! Response ← CORS, x-request-id ← JSON 200 | mapped error ←─────────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/fabriq/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use fabriq_core as core;

// Re-export the HTTP adapter
pub use fabriq_server as server;

// Re-export configuration
pub use fabriq_config as config;

// Re-export scheduling
pub use fabriq_tasks as tasks;

// Re-export payments
pub use fabriq_payment as payment;

/// Prelude module for convenient imports.
///
/// The context-aware scheduler trait is exported as `CtxScheduler` so it can
/// sit next to the plain [`tasks::Scheduler`].
///
/// ```rust,ignore
/// use fabriq::prelude::*;
/// ```
pub mod prelude {
    pub use fabriq_core::scheduler::{job as ctx_job, CtxJob, Scheduler as CtxScheduler};
    pub use fabriq_core::{
        Authentication, Ctx, ErrorCategory, HandlerError, HandlerResult, MicroError, MicroResult,
        RequestId, Transaction, TransactionManager,
    };

    pub use fabriq_server::logging::{init_logging, LoggingConfig};
    pub use fabriq_server::{
        filters, Filter, Input, Json, JwtVerifier, Router, Server, ServerConfig, ShutdownSignal,
        Validate, Violations,
    };

    pub use fabriq_config::{ConfigLoader, FabriqConfig};

    pub use fabriq_tasks::{job, IntervalScheduler, Scheduler, SchedulerConfig};

    pub use fabriq_payment::{
        InMemoryProvider, IntentRequest, IntentResponse, IntentStatus, PaymentError, Provider,
    };
}
