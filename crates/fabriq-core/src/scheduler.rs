//! Context-aware periodic job contract.
//!
//! Jobs registered here receive a fresh [`Ctx`] for the default tenant on
//! every run. The context-free variant lives in `fabriq-tasks`, which also
//! provides an implementation of both.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Ctx;
use crate::error::MicroError;

/// Boxed future returned by a [`CtxJob`].
pub type CtxJobFuture = Pin<Box<dyn Future<Output = Result<(), MicroError>> + Send>>;

/// A type-erased job receiving a request context.
pub type CtxJob = Arc<dyn Fn(Ctx) -> CtxJobFuture + Send + Sync>;

/// Periodic job registration with a [`Ctx`] per run.
pub trait Scheduler: Send + Sync {
    /// Starts running registered jobs in the background and returns.
    fn start_async(&self) -> Result<(), MicroError>;

    /// Registers `job` to run every `interval` (for example `"30s"`).
    fn every(&self, interval: &str, job: CtxJob) -> Result<(), MicroError>;
}

/// Erases an async closure into a [`CtxJob`].
///
/// # Example
///
/// ```
/// use fabriq_core::scheduler::job;
///
/// let cleanup = job(|ctx| async move {
///     tracing::info!(tenant_id = %ctx.tenant_id(), "purging expired sessions");
///     Ok(())
/// });
/// # let _ = cleanup;
/// ```
pub fn job<F, Fut>(f: F) -> CtxJob
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MicroError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}
