//! Stable job persistence.
//!
//! Every stable job is one field of a single hash, keyed by job name, holding
//! the JSON-encoded [`StableJobRecord`]. Both stores keep the encoded form so
//! the decode path is the same for tests and production.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::driver::store_call;
use crate::error::Result;
use crate::job::StableJobRecord;

/// Field-per-job hash holding every stable job of the fleet.
pub const STABLE_JOBS_KEY: &str = "stable-jobs";

/// Job store trait for persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save a job, replacing any record with the same name.
    async fn save(&self, record: &StableJobRecord) -> Result<()>;

    /// Load a job by name.
    async fn load(&self, name: &str) -> Result<Option<StableJobRecord>>;

    /// Load every record that decodes. Records that do not are logged and skipped.
    async fn load_all(&self) -> Result<Vec<StableJobRecord>>;

    /// Delete a job. Deleting a missing job is not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

fn encode(record: &StableJobRecord) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

fn decode_all(raw: HashMap<String, String>) -> Vec<StableJobRecord> {
    let mut records = Vec::with_capacity(raw.len());
    for (name, data) in raw {
        match serde_json::from_str::<StableJobRecord>(&data) {
            Ok(record) => records.push(record),
            Err(e) => warn!(job = %name, error = %e, "skipping undecodable job record"),
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    records
}

/// In-memory job store for testing.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, String>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Put an arbitrary encoded value under `name`.
    pub async fn insert_raw(&self, name: &str, data: &str) {
        self.jobs.write().await.insert(name.to_string(), data.to_string());
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, record: &StableJobRecord) -> Result<()> {
        let data = encode(record)?;
        self.jobs.write().await.insert(record.name.clone(), data);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<StableJobRecord>> {
        match self.jobs.read().await.get(name) {
            Some(data) => Ok(Some(serde_json::from_str(data)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<StableJobRecord>> {
        let raw = self.jobs.read().await.clone();
        Ok(decode_all(raw))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.jobs.write().await.remove(name);
        Ok(())
    }
}

/// Redis hash backed job store at `<prefix>stable-jobs`.
pub struct RedisJobStore {
    conn: ConnectionManager,
    key: String,
    op_timeout: Duration,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, key_prefix: &str, op_timeout: Duration) -> Self {
        Self {
            conn,
            key: stable_jobs_key(key_prefix),
            op_timeout,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn save(&self, record: &StableJobRecord) -> Result<()> {
        let data = encode(record)?;
        let mut conn = self.conn.clone();
        store_call("save_job", &self.key, self.op_timeout, async {
            let _: () = redis::cmd("HSET")
                .arg(&self.key)
                .arg(&record.name)
                .arg(&data)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await?;
        debug!(job = %record.name, key = %self.key, "saved stable job");
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<StableJobRecord>> {
        let mut conn = self.conn.clone();
        let data = store_call("load_job", &self.key, self.op_timeout, async {
            let data: Option<String> = redis::cmd("HGET")
                .arg(&self.key)
                .arg(name)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(data)
        })
        .await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<StableJobRecord>> {
        let mut conn = self.conn.clone();
        let raw = store_call("load_jobs", &self.key, self.op_timeout, async {
            let raw: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(&self.key)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(raw)
        })
        .await?;
        let records = decode_all(raw);
        debug!(count = records.len(), key = %self.key, "loaded stable jobs");
        Ok(records)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        store_call("delete_job", &self.key, self.op_timeout, async {
            let _: () = redis::cmd("HDEL")
                .arg(&self.key)
                .arg(name)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await?;
        debug!(job = %name, key = %self.key, "deleted stable job");
        Ok(())
    }
}

fn stable_jobs_key(prefix: &str) -> String {
    format!("{}{}", prefix, STABLE_JOBS_KEY)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
