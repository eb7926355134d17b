//! Node pool: membership polling, ring rebuilds and ownership checks.
//!
//! State machine:
//!
//! ```text
//!            two consecutive equal snapshots
//! Upgrading ───────────────────────────────▶ Steady
//!     ▲                                        │
//!     └────────── snapshot changed ────────────┘
//! ```
//!
//! The pool starts `Upgrading`. While upgrading every ownership check is
//! denied and the fire is deferred to the [`RecentJobs`] buffer; the buffer
//! is drained on the next transition to `Steady`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DcronOptions;
use crate::driver::Driver;
use crate::error::{DcronError, Result};
use crate::recent::{RecentJob, RecentJobs};
use crate::ring::HashRing;

/// Whether the local view of membership is believed stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Upgrading,
    Steady,
}

impl std::fmt::Display for ConvergenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceState::Upgrading => write!(f, "upgrading"),
            ConvergenceState::Steady => write!(f, "steady"),
        }
    }
}

/// Point-in-time view of the pool, for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: String,
    pub state: ConvergenceState,
    pub nodes: Vec<String>,
    pub last_change: Option<DateTime<Utc>>,
}

struct View {
    ring: Arc<HashRing>,
    /// Sorted snapshot the ring was built from.
    nodes: Vec<String>,
    state: ConvergenceState,
    last_change: Option<DateTime<Utc>>,
}

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the driver and the ring; answers "is job X mine right now?".
pub struct NodePool {
    driver: Arc<dyn Driver>,
    node_id: String,
    replicas: usize,
    update_interval: Duration,
    startup_wait: Option<Duration>,
    view: RwLock<View>,
    recent: RecentJobs,
    state_tx: watch::Sender<ConvergenceState>,
    replay_tx: Mutex<Option<mpsc::UnboundedSender<Vec<RecentJob>>>>,
    poller: Mutex<Option<Poller>>,
}

impl NodePool {
    pub fn new(driver: Arc<dyn Driver>, options: &DcronOptions) -> Self {
        let (state_tx, _) = watch::channel(ConvergenceState::Upgrading);
        Self {
            node_id: driver.node_id().to_string(),
            driver,
            replicas: options.hash_replicas,
            update_interval: options.update_interval,
            startup_wait: options.startup_wait,
            view: RwLock::new(View {
                ring: Arc::new(HashRing::new(options.hash_replicas)),
                nodes: Vec::new(),
                state: ConvergenceState::Upgrading,
                last_change: None,
            }),
            recent: RecentJobs::new(options.recent_jobs_capacity),
            state_tx,
            replay_tx: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> ConvergenceState {
        self.view.read().state
    }

    /// Watch convergence state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConvergenceState> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> ClusterStatus {
        let view = self.view.read();
        ClusterStatus {
            node_id: self.node_id.clone(),
            state: view.state,
            nodes: view.nodes.clone(),
            last_change: view.last_change,
        }
    }

    /// Where drained catch-up entries are delivered on each return to `Steady`.
    pub fn set_replay_sink(&self, tx: mpsc::UnboundedSender<Vec<RecentJob>>) {
        *self.replay_tx.lock() = Some(tx);
    }

    /// Start the driver, build the first ring and block until `Steady`.
    ///
    /// If `startup_wait` runs out first the pool keeps running degraded: it
    /// stays `Upgrading` and fails every check closed until it converges.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.poller.lock().is_some() {
            return Err(DcronError::AlreadyStarted("node pool"));
        }

        self.driver.start().await?;
        let nodes = match self.driver.get_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                let _ = self.driver.stop().await;
                return Err(e);
            }
        };
        let nodes = normalize(nodes);
        let ring = Arc::new(HashRing::from_nodes(self.replicas, &nodes));
        {
            let mut view = self.view.write();
            info!(node_id = %self.node_id, nodes = nodes.len(), "node pool started");
            view.ring = ring;
            view.nodes = nodes;
            view.state = ConvergenceState::Upgrading;
            view.last_change = Some(Utc::now());
        }
        self.state_tx.send_replace(ConvergenceState::Upgrading);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().poll_loop(cancel.clone()));
        *self.poller.lock() = Some(Poller { cancel, task });

        let mut rx = self.state_tx.subscribe();
        let converged = async move {
            let _ = rx.wait_for(|s| *s == ConvergenceState::Steady).await;
        };
        match self.startup_wait {
            Some(limit) => {
                if tokio::time::timeout(limit, converged).await.is_err() {
                    warn!(
                        node_id = %self.node_id,
                        waited = ?limit,
                        "membership did not converge, running degraded"
                    );
                }
            }
            None => converged.await,
        }
        Ok(())
    }

    /// Stop polling and stop the driver. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let poller = self.poller.lock().take();
        {
            let mut view = self.view.write();
            view.ring = Arc::new(HashRing::new(self.replicas));
            view.nodes.clear();
            view.state = ConvergenceState::Upgrading;
        }
        if let Some(poller) = poller {
            poller.cancel.cancel();
            let _ = poller.task.await;
            info!(node_id = %self.node_id, "node pool stopped");
        }
        self.driver.stop().await
    }

    /// Whether this node owns `job_name` right now.
    ///
    /// `Ok(false)` when no node is known, `Err(Upgrading)` while converging.
    pub fn check_job_available(&self, job_name: &str) -> Result<bool> {
        let view = self.view.read();
        self.decide(&view, job_name)
    }

    /// Like [`check_job_available`](Self::check_job_available), but an
    /// `Upgrading` denial also records the fire for catch-up. Recording under
    /// the same read lock the drain takes as a write lock means no deferred
    /// fire can slip between a denial and the next drain.
    pub(crate) fn check_or_defer(&self, job_name: &str, fired_at: DateTime<Utc>) -> Result<bool> {
        let view = self.view.read();
        let decision = self.decide(&view, job_name);
        if matches!(decision, Err(DcronError::Upgrading)) {
            self.recent.record(job_name, fired_at);
        }
        decision
    }

    fn decide(&self, view: &View, job_name: &str) -> Result<bool> {
        if view.ring.is_empty() {
            return Ok(false);
        }
        if view.state == ConvergenceState::Upgrading {
            return Err(DcronError::Upgrading);
        }
        Ok(view.ring.get(job_name) == Some(self.node_id.as_str()))
    }

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
        debug!(node_id = %self.node_id, "poll loop exited");
    }

    /// Fetch one snapshot and advance the state machine.
    pub(crate) async fn poll_once(&self) {
        match self.driver.get_nodes().await {
            Ok(nodes) => self.apply_snapshot(normalize(nodes)),
            Err(e) => {
                warn!(node_id = %self.node_id, error = %e, "get nodes failed, keeping previous ring");
            }
        }
    }

    fn apply_snapshot(&self, nodes: Vec<String>) {
        let changed = self.view.read().nodes != nodes;

        if changed {
            let ring = Arc::new(HashRing::from_nodes(self.replicas, &nodes));
            let mut view = self.view.write();
            info!(
                node_id = %self.node_id,
                before = view.nodes.len(),
                after = nodes.len(),
                "membership changed, upgrading"
            );
            view.ring = ring;
            view.nodes = nodes;
            view.state = ConvergenceState::Upgrading;
            view.last_change = Some(Utc::now());
            drop(view);
            self.state_tx.send_replace(ConvergenceState::Upgrading);
            return;
        }

        let drained = {
            let mut view = self.view.write();
            if view.state == ConvergenceState::Steady {
                return;
            }
            view.state = ConvergenceState::Steady;
            self.recent.pop_all()
        };
        info!(node_id = %self.node_id, nodes = nodes.len(), "membership steady");
        self.state_tx.send_replace(ConvergenceState::Steady);

        if drained.is_empty() {
            return;
        }
        match self.replay_tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(drained).is_err() {
                    warn!(node_id = %self.node_id, "replay sink closed, catch-up dropped");
                }
            }
            None => debug!(
                node_id = %self.node_id,
                count = drained.len(),
                "no replay sink, catch-up dropped"
            ),
        }
    }
}

fn normalize(mut nodes: Vec<String>) -> Vec<String> {
    nodes.sort_unstable();
    nodes.dedup();
    nodes
}

#[cfg(test)]
#[path = "node_pool_tests.rs"]
mod tests;
