//! CronEngine - local trigger engine.
//!
//! Each entry runs in its own task: sleep until the next fire time, await the
//! dispatch, repeat. A job's ticks therefore never overlap, while different
//! jobs fire concurrently. The engine knows nothing about ownership; the
//! dispatch closure decides what a tick does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{DcronError, Result};

/// What a tick does.
pub type Dispatch = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    schedule: Schedule,
    dispatch: Dispatch,
    cancel: CancellationToken,
}

#[derive(Default)]
struct EngineState {
    started: bool,
    entries: HashMap<String, Entry>,
}

/// Schedule-driven trigger engine.
pub struct CronEngine {
    state: Mutex<EngineState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl CronEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register an entry. Launched immediately if the engine is running,
    /// otherwise held until [`start`](Self::start).
    pub fn add(&self, name: &str, schedule: Schedule, dispatch: Dispatch) -> Result<()> {
        let mut state = self.state.lock();
        if state.entries.contains_key(name) {
            return Err(DcronError::DuplicateJob(name.to_string()));
        }
        let entry = Entry {
            schedule,
            dispatch,
            cancel: self.shutdown.child_token(),
        };
        if state.started {
            self.launch(name, &entry);
        }
        state.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Cancel and drop an entry. A tick already dispatching runs to completion.
    pub fn remove(&self, name: &str) -> bool {
        match self.state.lock().entries.remove(name) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next fire time of `name`, if registered and the schedule has one.
    pub fn next_fire(&self, name: &str) -> Option<DateTime<Local>> {
        let state = self.state.lock();
        state.entries.get(name)?.schedule.upcoming(Local).next()
    }

    /// Launch every held entry.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(DcronError::AlreadyStarted("cron engine"));
        }
        state.started = true;
        for (name, entry) in &state.entries {
            self.launch(name, entry);
        }
        info!(entries = state.entries.len(), "cron engine started");
        Ok(())
    }

    /// Cancel every timer and wait up to `grace` for in-flight ticks.
    ///
    /// Returns `false` if ticks were still running when `grace` ran out.
    pub async fn stop(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!("cron engine stopped");
        } else {
            warn!(grace = ?grace, "cron engine stopped with ticks still running");
        }
        drained
    }

    fn launch(&self, name: &str, entry: &Entry) {
        self.tracker.spawn(run_entry(
            name.to_string(),
            entry.schedule.clone(),
            entry.dispatch.clone(),
            entry.cancel.clone(),
        ));
    }
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_entry(name: String, schedule: Schedule, dispatch: Dispatch, cancel: CancellationToken) {
    let mut last: Option<DateTime<Local>> = None;
    loop {
        let now = Local::now();
        // Never fire the same instant twice when a sleep wakes a hair early.
        let from = last.map_or(now, |l| l.max(now));
        let Some(next) = schedule.after(&from).next() else {
            debug!(job = %name, "schedule has no upcoming fire");
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        last = Some(next);
        dispatch().await;
    }
    debug!(job = %name, "cron entry exited");
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
