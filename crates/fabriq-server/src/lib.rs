//! # Fabriq Server
//!
//! HTTP adapter binding hyper to the Fabriq micro-service contract.
//!
//! ## Request flow
//!
//! 1. [`Server`] accepts the request and answers `/health` and CORS preflight itself
//! 2. [`AuthResolver`] builds the caller's [`Authentication`](fabriq_core::Authentication)
//! 3. [`Router`] matches the route and runs its [`Filter`]s against the [`Ctx`](fabriq_core::Ctx)
//! 4. [`Dispatcher`] binds and validates the input, then calls the handler inside `ctx.tx`
//! 5. Success is served as JSON 200; failures go through [`map_error`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use fabriq_server::{filters, Router, Server, ServerConfig};
//! use fabriq_core::{Ctx, HandlerError};
//!
//! async fn whoami(ctx: Ctx) -> Result<String, HandlerError> {
//!     Ok(ctx.user_id().to_string())
//! }
//!
//! let mut router = Router::new();
//! router.get("/me", whoami).filter(filters::authenticated());
//!
//! let server = Server::builder()
//!     .config(ServerConfig::builder().http_addr("0.0.0.0:8080").build())
//!     .router(router)
//!     .build();
//! server.run().await?;
//! ```

#![doc(html_root_url = "https://docs.rs/fabriq-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod bind;
pub mod config;
pub mod dispatch;
mod error;
pub mod error_mapper;
pub mod filters;
pub mod health;
pub mod logging;
pub mod router;
mod server;
pub mod shutdown;
pub mod validation;

pub use auth::{AuthError, AuthResolver, JwtVerifier, TokenVerifier};
pub use bind::Input;
pub use config::{CorsConfig, ServerConfig, ServerConfigBuilder};
pub use dispatch::{Dispatcher, IntoEndpoint, Json, Reply};
pub use error::ServerError;
pub use error_mapper::map_error;
pub use filters::Filter;
pub use health::{HealthCheck, HealthStatus};
pub use router::{Route, RouteGroup, Router};
pub use server::{HttpResponse, ResponseBody, Server, ServerBuilder, REQUEST_ID_HEADER};
pub use shutdown::ShutdownSignal;
pub use validation::{Validate, Validator, Violations};
