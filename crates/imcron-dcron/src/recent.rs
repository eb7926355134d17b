//! Catch-up buffer for fires that happened while membership was converging.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

/// One fire that was skipped because the node pool was upgrading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentJob {
    pub job_name: String,
    pub fired_at: DateTime<Utc>,
}

/// Bounded `job name -> fired_at` map.
///
/// A job that fires several times during one upgrade window keeps a single
/// entry with its latest fire time, so it is replayed once.
pub struct RecentJobs {
    capacity: usize,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RecentJobs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a skipped fire. Evicts the oldest entry when full.
    pub fn record(&self, job_name: &str, fired_at: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(job_name) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                warn!(evicted = %oldest, "recent jobs buffer full");
                entries.remove(&oldest);
            }
        }
        entries.insert(job_name.to_string(), fired_at);
    }

    /// Remove and return every entry, oldest fire first.
    pub fn pop_all(&self) -> Vec<RecentJob> {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let mut jobs: Vec<RecentJob> = drained
            .into_iter()
            .map(|(job_name, fired_at)| RecentJob { job_name, fired_at })
            .collect();
        jobs.sort_by(|a, b| a.fired_at.cmp(&b.fired_at).then(a.job_name.cmp(&b.job_name)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
