//! Jobs and the per-fire ownership wrapper.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::node_pool::NodePool;

/// Something that can run on a schedule.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);

    /// Persistence view of this job, if it should survive restarts.
    fn as_stable(&self) -> Option<&dyn StableJob> {
        None
    }
}

/// A job that can be written to the job store and rebuilt after a restart.
pub trait StableJob: Send + Sync {
    fn job_name(&self) -> &str;

    fn cron_expr(&self) -> &str;

    /// Opaque data a [`JobRecoverer`](crate::JobRecoverer) turns back into the job.
    fn payload(&self) -> Result<serde_json::Value>;
}

/// Persisted form of a [`StableJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableJobRecord {
    pub name: String,
    pub cron: String,
    pub payload: serde_json::Value,
}

impl StableJobRecord {
    pub fn from_job(job: &dyn StableJob) -> Result<Self> {
        Ok(Self {
            name: job.job_name().to_string(),
            cron: job.cron_expr().to_string(),
            payload: job.payload()?,
        })
    }
}

type JobFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Job from an async closure.
pub struct FnJob {
    func: JobFn,
}

impl FnJob {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            func: Box::new(move || Box::pin(func())),
        }
    }
}

#[async_trait]
impl Job for FnJob {
    async fn run(&self) {
        (self.func)().await
    }
}

/// A registered job together with the decision of whether a fire runs here.
pub(crate) struct JobWrapper {
    name: String,
    cron_expr: String,
    /// Persisted form, for stable jobs.
    record: Option<StableJobRecord>,
    /// Set once registration is complete, including the store write.
    registered_at: Mutex<Option<Instant>>,
    job: Arc<dyn Job>,
    pool: Arc<NodePool>,
    fire_count: AtomicU64,
    run_count: AtomicU64,
}

impl JobWrapper {
    pub(crate) fn new(
        name: String,
        cron_expr: String,
        record: Option<StableJobRecord>,
        job: Arc<dyn Job>,
        pool: Arc<NodePool>,
    ) -> Self {
        Self {
            name,
            cron_expr,
            record,
            registered_at: Mutex::new(None),
            job,
            pool,
            fire_count: AtomicU64::new(0),
            run_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    pub(crate) fn record(&self) -> Option<&StableJobRecord> {
        self.record.as_ref()
    }

    /// `None` while the registration is still being persisted.
    pub(crate) fn registered_at(&self) -> Option<Instant> {
        *self.registered_at.lock()
    }

    pub(crate) fn mark_registered(&self) {
        *self.registered_at.lock() = Some(Instant::now());
    }

    pub(crate) fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::Relaxed)
    }

    pub(crate) fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::Relaxed)
    }

    /// One trigger-engine tick: run only if this node owns the job.
    pub(crate) async fn fire(&self) {
        self.fire_count.fetch_add(1, Ordering::Relaxed);
        match self.pool.check_or_defer(&self.name, Utc::now()) {
            Ok(true) => self.execute().await,
            Ok(false) => trace!(job = %self.name, "owned by another node"),
            Err(e) if e.is_upgrading() => {
                debug!(job = %self.name, "membership upgrading, fire deferred");
            }
            Err(e) => warn!(job = %self.name, error = %e, "ownership check failed"),
        }
    }

    /// Run the job body. A panicking body is logged and contained.
    pub(crate) async fn execute(&self) {
        self.run_count.fetch_add(1, Ordering::Relaxed);
        debug!(job = %self.name, "running job");
        if AssertUnwindSafe(self.job.run()).catch_unwind().await.is_err() {
            error!(job = %self.name, "job panicked");
        }
    }
}
