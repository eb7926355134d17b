//! Configuration schema definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub dcron: DcronConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix of every key the scheduler writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on a single store command.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl RedisConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "distributed-cron:".to_string()
}

fn default_op_timeout_ms() -> u64 {
    3000
}

/// Membership backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// One sorted set per service scored by heartbeat time.
    #[default]
    Zset,
    /// One expiring key per node.
    Key,
    /// Process-local registry; single-process development only.
    Memory,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcronConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub driver: DriverKind,

    /// Must match on every node of the fleet.
    #[serde(default = "default_hash_replicas")]
    pub hash_replicas: usize,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Liveness TTL; at least twice `update_interval_secs`.
    #[serde(default = "default_node_ttl_secs")]
    pub node_ttl_secs: u64,

    /// 0 waits forever.
    #[serde(default = "default_startup_wait_secs")]
    pub startup_wait_secs: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_recent_jobs_capacity")]
    pub recent_jobs_capacity: usize,

    /// Stable-job reconciliation period. 0 only loads the store at start.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl DcronConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn node_ttl(&self) -> Duration {
        Duration::from_secs(self.node_ttl_secs)
    }

    pub fn startup_wait(&self) -> Option<Duration> {
        match self.startup_wait_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        match self.sync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for DcronConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            driver: DriverKind::default(),
            hash_replicas: default_hash_replicas(),
            update_interval_secs: default_update_interval_secs(),
            node_ttl_secs: default_node_ttl_secs(),
            startup_wait_secs: default_startup_wait_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            recent_jobs_capacity: default_recent_jobs_capacity(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_service_name() -> String {
    "imcron".to_string()
}

fn default_hash_replicas() -> usize {
    50
}

fn default_update_interval_secs() -> u64 {
    3
}

fn default_node_ttl_secs() -> u64 {
    10
}

fn default_startup_wait_secs() -> u64 {
    60
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_recent_jobs_capacity() -> usize {
    1024
}

fn default_sync_interval_secs() -> u64 {
    10
}

/// Domain job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Base URL of the message/voice gateway the jobs call.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Idle time before a voice channel is closed.
    #[serde(default = "default_voice_channel_idle_minutes")]
    pub voice_channel_idle_minutes: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl JobsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            voice_channel_idle_minutes: default_voice_channel_idle_minutes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:10002".to_string()
}

fn default_voice_channel_idle_minutes() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Daily rolling log files go here when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
