//! Key-per-node driver.
//!
//! Every node owns `<prefix><service>:<uuid>`, written with a `PX` expiry and
//! refreshed at half the TTL. Discovery is a `SCAN` over the service prefix.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{Driver, HeartbeatSlot, RedisDriverOptions, generate_node_id, store_call};
use crate::error::Result;

const SCAN_COUNT: usize = 100;

/// Membership driver keeping one expiring key per node.
pub struct RedisKeyDriver {
    conn: ConnectionManager,
    options: RedisDriverOptions,
    service_name: String,
    node_id: String,
    heartbeat: HeartbeatSlot,
}

impl RedisKeyDriver {
    pub fn new(
        conn: ConnectionManager,
        service_name: impl Into<String>,
        options: RedisDriverOptions,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            node_id: generate_node_id(&service_name),
            conn,
            options,
            service_name,
            heartbeat: HeartbeatSlot::new(),
        }
    }

    fn node_key(&self) -> String {
        node_key(&self.options.key_prefix, &self.node_id)
    }

    async fn register(
        conn: &mut ConnectionManager,
        key: &str,
        node_id: &str,
        ttl: Duration,
        limit: Duration,
    ) -> Result<()> {
        let ttl_ms = ttl.as_millis() as u64;
        store_call("register", key, limit, async {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(node_id)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }
}

#[async_trait]
impl Driver for RedisKeyDriver {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn ttl(&self) -> Duration {
        self.options.ttl
    }

    async fn start(&self) -> Result<()> {
        self.heartbeat.claim()?;

        let key = self.node_key();
        let mut conn = self.conn.clone();
        let (ttl, limit) = (self.options.ttl, self.options.op_timeout);
        if let Err(e) = Self::register(&mut conn, &key, &self.node_id, ttl, limit).await {
            self.heartbeat.release();
            return Err(e);
        }

        let node_id = self.node_id.clone();
        self.heartbeat.spawn(
            self.node_id.clone(),
            ttl / 2,
            Box::new(move || {
                let mut conn = conn.clone();
                let key = key.clone();
                let node_id = node_id.clone();
                Box::pin(async move { Self::register(&mut conn, &key, &node_id, ttl, limit).await })
            }),
        );
        debug!(node_id = %self.node_id, "redis key driver started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.heartbeat.stop().await {
            return Ok(());
        }
        let key = self.node_key();
        let mut conn = self.conn.clone();
        let removed = store_call("deregister", &key, self.options.op_timeout, async {
            let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await;
        if let Err(e) = removed {
            warn!(node_id = %self.node_id, error = %e, "failed to remove node key");
        }
        Ok(())
    }

    async fn get_nodes(&self) -> Result<Vec<String>> {
        let pattern = scan_pattern(&self.options.key_prefix, &self.service_name);
        let mut conn = self.conn.clone();

        let keys = store_call("get_nodes", &pattern, self.options.op_timeout, async {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, redis::RedisError>(keys)
        })
        .await?;

        Ok(keys
            .into_iter()
            .filter_map(|key| node_id_from_key(&self.options.key_prefix, &key))
            .collect())
    }
}

fn node_key(prefix: &str, node_id: &str) -> String {
    format!("{}{}", prefix, node_id)
}

fn scan_pattern(prefix: &str, service_name: &str) -> String {
    format!("{}{}:*", prefix, service_name)
}

fn node_id_from_key(prefix: &str, key: &str) -> Option<String> {
    key.strip_prefix(prefix).map(str::to_string)
}
