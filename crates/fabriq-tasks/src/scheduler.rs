//! Interval-based job scheduler.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fabriq_core::scheduler::{CtxJob, Scheduler as CtxScheduler};
use fabriq_core::{Ctx, MicroError, DEFAULT_TENANT_ID};

use crate::error::{TaskError, TaskResult};
use crate::interval::parse_interval;

/// Boxed future returned by a [`JobFn`].
pub type JobFuture = Pin<Box<dyn Future<Output = TaskResult<()>> + Send>>;

/// A type-erased context-free job.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Erases an async closure into a [`JobFn`].
pub fn job<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Periodic job registration without a request context.
pub trait Scheduler: Send + Sync {
    /// Starts running registered jobs in the background and returns.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::AlreadyRunning`] if already started.
    fn start_async(&self) -> TaskResult<()>;

    /// Registers `job` to run every `interval` (for example `"30s"`).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidInterval`] if `interval` cannot be parsed.
    fn every(&self, interval: &str, job: JobFn) -> TaskResult<JobId>;
}

/// Unique identifier for a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a new id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a job's state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job id.
    pub id: JobId,
    /// Job name.
    pub name: String,
    /// Time between runs.
    pub interval: Duration,
    /// Start of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// Completed runs, successful or not.
    pub run_count: u64,
    /// Runs that returned an error or panicked.
    pub fail_count: u64,
}

enum Work {
    Plain(JobFn),
    WithCtx(CtxJob),
}

struct JobEntry {
    info: RwLock<JobInfo>,
    work: Work,
}

impl JobEntry {
    async fn run_once(&self) {
        let id = self.info.read().id;
        self.info.write().last_run = Some(Utc::now());
        debug!(job_id = %id, "running scheduled job");

        let outcome = match &self.work {
            Work::Plain(f) => AssertUnwindSafe(f())
                .catch_unwind()
                .await
                .map(|r| r.map_err(|e| e.to_string())),
            Work::WithCtx(f) => AssertUnwindSafe(f(Ctx::new(DEFAULT_TENANT_ID)))
                .catch_unwind()
                .await
                .map(|r| r.map_err(|e| e.to_string())),
        };

        let mut info = self.info.write();
        info.run_count += 1;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                info.fail_count += 1;
                warn!(job_id = %id, job_name = %info.name, error = %e, "scheduled job failed");
            }
            Err(_) => {
                info.fail_count += 1;
                warn!(job_id = %id, job_name = %info.name, "scheduled job panicked");
            }
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerConfig {
    /// Run each job once right away instead of after its first interval.
    pub run_on_start: bool,
}

/// Runs each job on its own tokio interval.
///
/// Implements both the context-free [`Scheduler`] and the context-aware
/// [`fabriq_core::scheduler::Scheduler`]; context-aware jobs get a fresh
/// [`Ctx`] for the default tenant on every run. A failing job is logged and
/// keeps its schedule. Runs of one job never overlap; a run that outlasts
/// the interval delays the next one.
///
/// # Example
///
/// ```
/// use fabriq_tasks::{job, IntervalScheduler, Scheduler};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fabriq_tasks::TaskError> {
/// let scheduler = IntervalScheduler::new();
/// Scheduler::every(&scheduler, "30s", job(|| async {
///     tracing::info!("refreshing exchange rates");
///     Ok(())
/// }))?;
/// scheduler.start_async()?;
/// scheduler.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct IntervalScheduler {
    config: SchedulerConfig,
    jobs: DashMap<JobId, Arc<JobEntry>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IntervalScheduler {
    /// Creates a stopped scheduler with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a stopped scheduler.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            jobs: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns whether the scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Registers a named context-free job.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` cannot be parsed.
    pub fn register(
        &self,
        name: impl Into<String>,
        interval: &str,
        job: JobFn,
    ) -> TaskResult<JobId> {
        self.insert(name.into(), interval, Work::Plain(job))
    }

    /// Registers a named job that receives a [`Ctx`].
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` cannot be parsed.
    pub fn register_with_ctx(
        &self,
        name: impl Into<String>,
        interval: &str,
        job: CtxJob,
    ) -> TaskResult<JobId> {
        self.insert(name.into(), interval, Work::WithCtx(job))
    }

    /// Returns a snapshot of one job.
    #[must_use]
    pub fn get_job(&self, id: JobId) -> Option<JobInfo> {
        self.jobs.get(&id).map(|e| e.info.read().clone())
    }

    /// Returns snapshots of all jobs.
    #[must_use]
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .iter()
            .map(|e| e.value().info.read().clone())
            .collect()
    }

    /// Runs a job once, now, outside its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown id.
    pub async fn run_now(&self, id: JobId) -> TaskResult<()> {
        let entry = self
            .jobs
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        entry.run_once().await;
        Ok(())
    }

    /// Stops all loops, letting in-flight runs finish.
    pub async fn stop(&self) {
        let handles = {
            let mut handles = self.handles.lock();
            if !self.running.swap(false, Ordering::AcqRel) {
                return;
            }
            self.shutdown.send_replace(true);
            std::mem::take(&mut *handles)
        };

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }

        info!("scheduler stopped");
    }

    fn insert(&self, name: String, interval: &str, work: Work) -> TaskResult<JobId> {
        let period = parse_interval(interval)?;
        let id = JobId::new();

        let entry = Arc::new(JobEntry {
            info: RwLock::new(JobInfo {
                id,
                name: name.clone(),
                interval: period,
                last_run: None,
                run_count: 0,
                fail_count: 0,
            }),
            work,
        });

        // Registration and start/stop are serialized on `handles`, so a job
        // is spawned at most once per run and never after `stop`.
        let mut handles = self.handles.lock();
        self.jobs.insert(id, Arc::clone(&entry));
        if self.is_running() {
            self.spawn(&mut handles, entry, period);
        }
        drop(handles);

        info!(job_id = %id, job_name = %name, interval = %interval, "registered scheduled job");
        Ok(id)
    }

    fn spawn(&self, handles: &mut Vec<JoinHandle<()>>, entry: Arc<JobEntry>, period: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let first = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => entry.run_once().await,
                    _ = shutdown.changed() => break,
                }
            }
        });

        handles.push(handle);
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("config", &self.config)
            .field("jobs", &self.jobs.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl Scheduler for IntervalScheduler {
    fn start_async(&self) -> TaskResult<()> {
        let mut handles = self.handles.lock();
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyRunning);
        }

        self.shutdown.send_replace(false);
        for entry in &self.jobs {
            let period = entry.value().info.read().interval;
            self.spawn(&mut handles, Arc::clone(entry.value()), period);
        }
        drop(handles);

        info!(jobs = self.jobs.len(), "scheduler started");
        Ok(())
    }

    fn every(&self, interval: &str, job: JobFn) -> TaskResult<JobId> {
        self.register(format!("every {interval}"), interval, job)
    }
}

impl CtxScheduler for IntervalScheduler {
    fn start_async(&self) -> Result<(), MicroError> {
        Scheduler::start_async(self).map_err(MicroError::from)
    }

    fn every(&self, interval: &str, job: CtxJob) -> Result<(), MicroError> {
        self.register_with_ctx(format!("every {interval}"), interval, job)
            .map(|_| ())
            .map_err(MicroError::from)
    }
}
