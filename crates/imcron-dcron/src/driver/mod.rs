//! Membership drivers.
//!
//! A driver registers this process as a live node in a shared store, keeps
//! the registration alive with a heartbeat and reports every node that has
//! heartbeated within its TTL.
//!
//! - [`RedisZSetDriver`]: one sorted set per service scored by heartbeat time
//! - [`RedisKeyDriver`]: one expiring key per node, discovered with `SCAN`
//! - [`MemoryDriver`]: process-local registry with the same TTL semantics

mod heartbeat;
mod memory;
mod redis_key;
mod redis_zset;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DcronError, Result};

pub use memory::{MemoryDriver, MemoryRegistry};
pub use redis_key::RedisKeyDriver;
pub use redis_zset::RedisZSetDriver;

pub(crate) use heartbeat::HeartbeatSlot;

/// Node membership backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Identifier of this process, `<service_name>:<uuid>`.
    fn node_id(&self) -> &str;

    /// Registration time-to-live.
    fn ttl(&self) -> Duration;

    /// Register this node and start heartbeating at half the TTL.
    async fn start(&self) -> Result<()>;

    /// Stop heartbeating and drop the registration. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Every node that heartbeated within the TTL.
    ///
    /// Errors when the store cannot be reached; an empty list means the
    /// store answered and nobody is alive.
    async fn get_nodes(&self) -> Result<Vec<String>>;
}

/// Options shared by the Redis-backed drivers.
#[derive(Debug, Clone)]
pub struct RedisDriverOptions {
    pub key_prefix: String,
    pub ttl: Duration,
    pub op_timeout: Duration,
}

impl Default for RedisDriverOptions {
    fn default() -> Self {
        Self {
            key_prefix: crate::config::DEFAULT_KEY_PREFIX.to_string(),
            ttl: Duration::from_secs(10),
            op_timeout: Duration::from_secs(3),
        }
    }
}

/// Fresh node identifier for `service_name`.
pub fn generate_node_id(service_name: &str) -> String {
    format!("{}:{}", service_name, Uuid::new_v4())
}

/// Run a store command, bounded by `limit`, tagging failures with `op` and `key`.
pub(crate) async fn store_call<T, F>(
    op: &'static str,
    key: &str,
    limit: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(DcronError::Store {
            op,
            key: key.to_string(),
            source,
        }),
        Err(_) => Err(DcronError::Timeout {
            op,
            key: key.to_string(),
        }),
    }
}
