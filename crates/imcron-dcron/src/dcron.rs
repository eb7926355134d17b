//! Dcron - the scheduler facade.
//!
//! Every node of a fleet registers the same jobs. The trigger engine fires
//! them everywhere; each fire runs only on the node the hash ring assigns the
//! job to, so a job runs once per tick across the fleet.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::DcronOptions;
use crate::driver::Driver;
use crate::engine::{CronEngine, Dispatch};
use crate::error::{DcronError, Result};
use crate::job::{FnJob, Job, JobWrapper, StableJob, StableJobRecord};
use crate::node_pool::{ClusterStatus, NodePool};
use crate::recent::RecentJob;
use crate::schedule::parse_schedule;
use crate::store::JobStore;

/// Turns a persisted record back into a runnable job.
pub trait JobRecoverer: Send + Sync {
    fn recover(&self, record: &StableJobRecord) -> Result<Arc<dyn Job>>;
}

/// Registered job, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub cron: String,
    pub stable: bool,
    /// Ticks seen on this node, owned or not.
    pub fire_count: u64,
    /// Ticks that ran here, including catch-up runs.
    pub run_count: u64,
    pub next_fire: Option<DateTime<Local>>,
}

/// Job table and trigger engine, shared with the background tasks.
#[derive(Clone)]
struct Registry {
    pool: Arc<NodePool>,
    engine: Arc<CronEngine>,
    jobs: Arc<RwLock<HashMap<String, Arc<JobWrapper>>>>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<Arc<JobWrapper>> {
        self.jobs.read().get(name).cloned()
    }

    fn insert(
        &self,
        name: &str,
        cron: &str,
        job: Arc<dyn Job>,
        record: Option<StableJobRecord>,
    ) -> Result<Arc<JobWrapper>> {
        let schedule = parse_schedule(cron)?;
        let wrapper = Arc::new(JobWrapper::new(
            name.to_string(),
            cron.to_string(),
            record,
            job,
            self.pool.clone(),
        ));

        let mut jobs = self.jobs.write();
        if jobs.contains_key(name) {
            return Err(DcronError::DuplicateJob(name.to_string()));
        }
        self.engine.add(name, schedule, dispatch(wrapper.clone()))?;
        jobs.insert(name.to_string(), wrapper.clone());
        Ok(wrapper)
    }

    fn take(&self, name: &str) -> Option<Arc<JobWrapper>> {
        let taken = self.jobs.write().remove(name);
        self.engine.remove(name);
        taken
    }

    fn unregister(&self, name: &str) -> bool {
        self.take(name).is_some()
    }

    /// Put back a wrapper taken with [`take`](Self::take).
    fn restore(&self, wrapper: Arc<JobWrapper>) -> Result<()> {
        let schedule = parse_schedule(wrapper.cron_expr())?;
        let mut jobs = self.jobs.write();
        if jobs.contains_key(wrapper.name()) {
            return Err(DcronError::DuplicateJob(wrapper.name().to_string()));
        }
        self.engine.add(wrapper.name(), schedule, dispatch(wrapper.clone()))?;
        jobs.insert(wrapper.name().to_string(), wrapper);
        Ok(())
    }
}

struct Background {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Distributed cron scheduler.
///
/// A stopped scheduler cannot be started again, even if it was never started.
pub struct Dcron {
    options: DcronOptions,
    registry: Registry,
    store: Option<Arc<dyn JobStore>>,
    recoverer: Option<Arc<dyn JobRecoverer>>,
    started: AtomicBool,
    stopping: AtomicBool,
    background: Mutex<Option<Background>>,
    stopped: CancellationToken,
}

impl Dcron {
    /// Create a scheduler over `driver`. Fails if `options` do not fit the
    /// driver's TTL.
    pub fn new(driver: Arc<dyn Driver>, options: DcronOptions) -> Result<Self> {
        options.validate(driver.ttl())?;
        let registry = Registry {
            pool: Arc::new(NodePool::new(driver, &options)),
            engine: Arc::new(CronEngine::new()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        };
        Ok(Self {
            options,
            registry,
            store: None,
            recoverer: None,
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            background: Mutex::new(None),
            stopped: CancellationToken::new(),
        })
    }

    /// Persist stable jobs to `store`.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Rebuild persisted jobs with `recoverer` on start and on every sync.
    pub fn with_recoverer(mut self, recoverer: Arc<dyn JobRecoverer>) -> Self {
        self.recoverer = Some(recoverer);
        self
    }

    pub fn node_id(&self) -> &str {
        self.registry.pool.node_id()
    }

    pub fn options(&self) -> &DcronOptions {
        &self.options
    }

    /// Register `job` under `name`. Stable jobs are also persisted; if that
    /// fails the registration is undone and the error returned.
    pub async fn add_job(&self, name: &str, cron: &str, job: Arc<dyn Job>) -> Result<()> {
        let record = match job.as_stable() {
            Some(stable) => Some(self.record_for(name, cron, stable)?),
            None => None,
        };
        self.register(name, cron, job, record).await
    }

    /// Register an async closure.
    pub async fn add_func<F, Fut>(&self, name: &str, cron: &str, func: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add_job(name, cron, Arc::new(FnJob::new(func))).await
    }

    /// Register and persist a stable job under its own name and schedule.
    pub async fn add_stable_job<J>(&self, job: Arc<J>) -> Result<()>
    where
        J: Job + StableJob + 'static,
    {
        let record = StableJobRecord::from_job(&*job)?;
        let (name, cron) = (record.name.clone(), record.cron.clone());
        self.register(&name, &cron, job, Some(record)).await
    }

    /// Register and persist a stable job, replacing any job of the same name.
    /// If the new job cannot be registered or persisted the previous one is
    /// kept.
    pub async fn replace_stable_job<J>(&self, job: Arc<J>) -> Result<()>
    where
        J: Job + StableJob + 'static,
    {
        let record = StableJobRecord::from_job(&*job)?;
        let (name, cron) = (record.name.clone(), record.cron.clone());
        let previous = self.registry.take(&name);
        let result = self.register(&name, &cron, job, Some(record)).await;
        if let (Err(e), Some(previous)) = (&result, previous) {
            match self.registry.restore(previous) {
                Ok(()) => warn!(job = %name, error = %e, "replacement failed, previous job kept"),
                Err(restore) => {
                    warn!(job = %name, error = %restore, "replacement failed, previous job lost");
                }
            }
        }
        result
    }

    /// Unregister `name` and drop its persisted record. Removing an unknown
    /// job is not an error.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let removed = self.registry.unregister(name);
        if let Some(store) = &self.store {
            store.delete(name).await?;
        }
        if removed {
            info!(job = %name, "job removed");
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.jobs.read().contains_key(name)
    }

    /// Every registered job, by name.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.registry.jobs.read();
        let mut infos: Vec<JobInfo> = jobs.values().map(|w| self.info(w)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn job(&self, name: &str) -> Option<JobInfo> {
        self.registry.get(name).map(|w| self.info(&w))
    }

    pub fn status(&self) -> ClusterStatus {
        self.registry.pool.status()
    }

    /// Whether this node currently owns `name`.
    pub fn check_job_available(&self, name: &str) -> Result<bool> {
        self.registry.pool.check_job_available(name)
    }

    /// Rebuild every persisted job. Records that cannot be decoded or
    /// rebuilt, and names already registered, are skipped with a log.
    ///
    /// Returns how many jobs were registered.
    pub async fn recover(&self) -> Result<usize> {
        let (Some(store), Some(recoverer)) = (&self.store, &self.recoverer) else {
            return Ok(0);
        };
        let records = store.load_all().await?;
        let recovered = recover_missing(&self.registry, recoverer.as_ref(), &records);
        info!(recovered, "stable jobs recovered");
        Ok(recovered)
    }

    /// Reconcile registered stable jobs with the job store: register records
    /// this node lacks, drop stable jobs whose record is gone, and re-register
    /// those whose record changed.
    ///
    /// Returns how many registrations changed.
    pub async fn sync(&self) -> Result<usize> {
        match (&self.store, &self.recoverer) {
            (Some(store), Some(recoverer)) => {
                sync_stable_jobs(&self.registry, store.as_ref(), recoverer.as_ref()).await
            }
            _ => Ok(0),
        }
    }

    /// Recover persisted jobs, join the fleet and start firing.
    ///
    /// Blocks until membership converges or the startup wait runs out.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            if self.stopping.load(Ordering::SeqCst) {
                return Err(DcronError::Stopped);
            }
            return Err(DcronError::AlreadyStarted("dcron"));
        }

        // Recovered jobs are held by the engine until it starts.
        if let Err(e) = self.recover().await {
            warn!(error = %e, "job recovery failed, continuing without persisted jobs");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.pool.set_replay_sink(tx);
        let cancel = CancellationToken::new();
        let replay = tokio::spawn(replay_loop(rx, self.registry.clone(), cancel.clone()));
        *self.background.lock() = Some(Background {
            cancel: cancel.clone(),
            tasks: vec![replay],
        });

        if let Err(e) = self.registry.pool.start().await {
            self.stop_background().await;
            return Err(e);
        }
        if self.stopping.load(Ordering::SeqCst) {
            // stop() ran while the pool was converging and may have missed it.
            let _ = self.registry.pool.stop().await;
            self.stop_background().await;
            return Err(DcronError::Stopped);
        }

        if let (Some(interval), Some(store), Some(recoverer)) =
            (self.options.sync_interval, &self.store, &self.recoverer)
        {
            let sync = tokio::spawn(sync_loop(
                self.registry.clone(),
                store.clone(),
                recoverer.clone(),
                interval,
                cancel,
            ));
            if let Some(background) = self.background.lock().as_mut() {
                background.tasks.push(sync);
            }
        }

        self.registry.engine.start()?;
        info!(node_id = %self.node_id(), jobs = self.registry.engine.len(), "dcron started");
        Ok(())
    }

    /// Start, then block until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        self.stopped.cancelled().await;
        Ok(())
    }

    /// Leave the fleet, then stop firing and drain in-flight ticks. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.started.store(true, Ordering::SeqCst);
        let left = self.registry.pool.stop().await;
        if !self.registry.engine.stop(self.options.stop_grace).await {
            warn!(node_id = %self.node_id(), "stopped before every tick finished");
        }
        self.stop_background().await;
        self.stopped.cancel();
        info!(node_id = %self.node_id(), "dcron stopped");
        left
    }

    fn info(&self, wrapper: &JobWrapper) -> JobInfo {
        JobInfo {
            name: wrapper.name().to_string(),
            cron: wrapper.cron_expr().to_string(),
            stable: wrapper.record().is_some(),
            fire_count: wrapper.fire_count(),
            run_count: wrapper.run_count(),
            next_fire: self.registry.engine.next_fire(wrapper.name()),
        }
    }

    fn record_for(&self, name: &str, cron: &str, stable: &dyn StableJob) -> Result<StableJobRecord> {
        let mut record = StableJobRecord::from_job(stable)?;
        if record.name != name || record.cron != cron {
            warn!(
                job = %name,
                own_name = %record.name,
                "stable job registered under a different name or schedule, persisting the registration"
            );
            record.name = name.to_string();
            record.cron = cron.to_string();
        }
        Ok(record)
    }

    async fn register(
        &self,
        name: &str,
        cron: &str,
        job: Arc<dyn Job>,
        record: Option<StableJobRecord>,
    ) -> Result<()> {
        let stable = record.is_some();
        let wrapper = self.registry.insert(name, cron, job, record.clone())?;

        if let (Some(record), Some(store)) = (&record, &self.store) {
            if let Err(e) = store.save(record).await {
                self.registry.unregister(name);
                warn!(job = %name, error = %e, "failed to persist job, registration undone");
                return Err(e);
            }
        }
        wrapper.mark_registered();
        info!(job = %name, cron = %cron, stable, "job added");
        Ok(())
    }

    async fn stop_background(&self) {
        let background = self.background.lock().take();
        if let Some(background) = background {
            background.cancel.cancel();
            for task in background.tasks {
                let _ = task.await;
            }
        }
    }
}

fn dispatch(wrapper: Arc<JobWrapper>) -> Dispatch {
    Arc::new(move || {
        let wrapper = wrapper.clone();
        Box::pin(async move { wrapper.fire().await })
    })
}

/// Run catch-up batches from the node pool. Each entry runs only if the job
/// is still registered and this node owns it under the settled ring.
async fn replay_loop(
    mut rx: mpsc::UnboundedReceiver<Vec<RecentJob>>,
    registry: Registry,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        for entry in batch {
            let Some(wrapper) = registry.get(&entry.job_name) else {
                debug!(job = %entry.job_name, "deferred job no longer registered");
                continue;
            };
            match registry.pool.check_job_available(&entry.job_name) {
                Ok(true) => {
                    info!(job = %entry.job_name, fired_at = %entry.fired_at, "running deferred fire");
                    wrapper.execute().await;
                }
                Ok(false) => trace!(job = %entry.job_name, "deferred job owned elsewhere"),
                Err(e) => debug!(job = %entry.job_name, error = %e, "deferred job not replayed"),
            }
        }
    }
}

fn recover_missing(
    registry: &Registry,
    recoverer: &dyn JobRecoverer,
    records: &[StableJobRecord],
) -> usize {
    let mut recovered = 0;
    for record in records {
        if registry.get(&record.name).is_some() {
            debug!(job = %record.name, "already registered, not recovered");
            continue;
        }
        let job = match recoverer.recover(record) {
            Ok(job) => job,
            Err(e) => {
                warn!(job = %record.name, error = %e, "skipping unrecoverable job");
                continue;
            }
        };
        match registry.insert(&record.name, &record.cron, job, Some(record.clone())) {
            Ok(wrapper) => {
                wrapper.mark_registered();
                recovered += 1;
            }
            Err(DcronError::DuplicateJob(name)) => {
                debug!(job = %name, "already registered, not recovered");
            }
            Err(e) => warn!(job = %record.name, error = %e, "skipping unrecoverable job"),
        }
    }
    recovered
}

async fn sync_stable_jobs(
    registry: &Registry,
    store: &dyn JobStore,
    recoverer: &dyn JobRecoverer,
) -> Result<usize> {
    // Jobs still saving, or registered after this point, may be missing from
    // the snapshot.
    let snapshot_at = Instant::now();
    let records = store.load_all().await?;
    let wanted: HashMap<&str, &StableJobRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    let stale: Vec<String> = registry
        .jobs
        .read()
        .values()
        .filter(|w| w.registered_at().is_some_and(|at| at < snapshot_at))
        .filter_map(|w| {
            let record = w.record()?;
            (wanted.get(record.name.as_str()) != Some(&record)).then(|| record.name.clone())
        })
        .collect();
    for name in &stale {
        registry.unregister(name);
        debug!(job = %name, "stable job dropped by sync");
    }

    let added = recover_missing(registry, recoverer, &records);
    let changed = stale.len() + added;
    if changed > 0 {
        info!(dropped = stale.len(), added, "stable jobs synced");
    }
    Ok(changed)
}

async fn sync_loop(
    registry: Registry,
    store: Arc<dyn JobStore>,
    recoverer: Arc<dyn JobRecoverer>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sync_stable_jobs(&registry, store.as_ref(), recoverer.as_ref()).await {
                    warn!(error = %e, "stable job sync failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "dcron_tests.rs"]
mod tests;
