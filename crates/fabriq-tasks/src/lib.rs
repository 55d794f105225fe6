//! Periodic jobs for Fabriq services.
//!
//! Two scheduler contracts share one implementation:
//!
//! - [`Scheduler`]: jobs take no arguments.
//! - [`fabriq_core::scheduler::Scheduler`]: jobs receive a [`fabriq_core::Ctx`].
//!
//! [`IntervalScheduler`] implements both on tokio intervals. Intervals are
//! written like `"500ms"`, `"30s"` or `"1h30m"`; see [`parse_interval`].

mod error;
mod interval;
mod scheduler;

pub use error::{TaskError, TaskResult};
pub use interval::parse_interval;
pub use scheduler::{
    job, IntervalScheduler, JobFn, JobFuture, JobId, JobInfo, Scheduler, SchedulerConfig,
};
