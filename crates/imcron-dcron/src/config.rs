//! Scheduler options.

use std::time::Duration;

use crate::error::{DcronError, Result};

/// Prefix shared by every key the scheduler writes to the backing store.
pub const DEFAULT_KEY_PREFIX: &str = "distributed-cron:";

/// Options for a [`Dcron`](crate::Dcron) instance and its node pool.
///
/// `hash_replicas` must be identical on every node of the fleet: each node
/// rebuilds the ring on its own from the same membership snapshot.
#[derive(Debug, Clone)]
pub struct DcronOptions {
    /// Service namespace; node identifiers are `<service_name>:<uuid>`.
    pub service_name: String,

    /// Virtual ring points per node.
    pub hash_replicas: usize,

    /// Membership poll interval.
    pub update_interval: Duration,

    /// Upper bound on how long `start` waits for convergence.
    /// `None` waits forever.
    pub startup_wait: Option<Duration>,

    /// How long `stop` waits for in-flight ticks.
    pub stop_grace: Duration,

    /// Maximum number of buffered catch-up entries.
    pub recent_jobs_capacity: usize,

    /// How often stable jobs are reconciled with the job store, so jobs
    /// added or removed on one node reach the rest of the fleet.
    /// `None` only loads the store once at start.
    pub sync_interval: Option<Duration>,
}

impl DcronOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_hash_replicas(mut self, replicas: usize) -> Self {
        self.hash_replicas = replicas;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_startup_wait(mut self, wait: Option<Duration>) -> Self {
        self.startup_wait = wait;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_recent_jobs_capacity(mut self, capacity: usize) -> Self {
        self.recent_jobs_capacity = capacity;
        self
    }

    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Check the options against the liveness TTL of the driver in use.
    ///
    /// A TTL shorter than two poll intervals makes live nodes drop out of
    /// snapshots between heartbeats.
    pub fn validate(&self, node_ttl: Duration) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(DcronError::Config("service_name cannot be empty".to_string()));
        }
        if self.hash_replicas == 0 {
            return Err(DcronError::Config(
                "hash_replicas must be greater than 0".to_string(),
            ));
        }
        if self.update_interval.is_zero() {
            return Err(DcronError::Config(
                "update_interval must be greater than 0".to_string(),
            ));
        }
        if self.sync_interval.is_some_and(|i| i.is_zero()) {
            return Err(DcronError::Config(
                "sync_interval must be greater than 0".to_string(),
            ));
        }
        if node_ttl < self.update_interval * 2 {
            return Err(DcronError::Config(format!(
                "node ttl {:?} must be at least twice the update interval {:?}",
                node_ttl, self.update_interval
            )));
        }
        Ok(())
    }
}

impl Default for DcronOptions {
    fn default() -> Self {
        Self {
            service_name: "imcron".to_string(),
            hash_replicas: 50,
            update_interval: Duration::from_secs(3),
            startup_wait: Some(Duration::from_secs(60)),
            stop_grace: Duration::from_secs(10),
            recent_jobs_capacity: 1024,
            sync_interval: Some(Duration::from_secs(10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let opts = DcronOptions::default();
        assert_eq!(opts.hash_replicas, 50);
        assert_eq!(opts.update_interval, Duration::from_secs(3));
        assert_eq!(opts.startup_wait, Some(Duration::from_secs(60)));
        assert_eq!(opts.recent_jobs_capacity, 1024);
        assert_eq!(opts.sync_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_options_builder() {
        let opts = DcronOptions::new("msg-cron")
            .with_hash_replicas(10)
            .with_update_interval(Duration::from_secs(1))
            .with_startup_wait(None);
        assert_eq!(opts.service_name, "msg-cron");
        assert_eq!(opts.hash_replicas, 10);
        assert_eq!(opts.update_interval, Duration::from_secs(1));
        assert!(opts.startup_wait.is_none());
    }

    #[test]
    fn test_validate_accepts_ttl_of_two_intervals() {
        let opts = DcronOptions::default();
        assert!(opts.validate(Duration::from_secs(6)).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_ttl() {
        let opts = DcronOptions::default();
        let err = opts.validate(Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_validate_rejects_zero_replicas() {
        let opts = DcronOptions::default().with_hash_replicas(0);
        assert!(opts.validate(Duration::from_secs(10)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sync_interval() {
        let opts = DcronOptions::default().with_sync_interval(Some(Duration::ZERO));
        assert!(opts.validate(Duration::from_secs(10)).is_err());
        let opts = DcronOptions::default().with_sync_interval(None);
        assert!(opts.validate(Duration::from_secs(10)).is_ok());
    }
}
