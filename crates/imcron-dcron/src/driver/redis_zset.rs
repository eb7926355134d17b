//! Scored-collection driver.
//!
//! All nodes of a service share one sorted set at `<prefix><service>`. Each
//! heartbeat writes the node with the current Unix time in milliseconds as
//! its score and prunes members older than the TTL; discovery is a single
//! `ZRANGEBYSCORE` over the live window.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{Driver, HeartbeatSlot, RedisDriverOptions, generate_node_id, store_call};
use crate::error::Result;

/// Membership driver over one sorted set per service.
pub struct RedisZSetDriver {
    conn: ConnectionManager,
    options: RedisDriverOptions,
    key: String,
    node_id: String,
    heartbeat: HeartbeatSlot,
}

impl RedisZSetDriver {
    pub fn new(
        conn: ConnectionManager,
        service_name: impl Into<String>,
        options: RedisDriverOptions,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            key: collection_key(&options.key_prefix, &service_name),
            node_id: generate_node_id(&service_name),
            conn,
            options,
            heartbeat: HeartbeatSlot::new(),
        }
    }

    async fn beat(
        conn: &mut ConnectionManager,
        key: &str,
        node_id: &str,
        ttl: Duration,
        limit: Duration,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let stale = format!("({}", live_since(now, ttl));
        store_call("heartbeat", key, limit, async {
            let _: () = redis::pipe()
                .atomic()
                .cmd("ZADD")
                .arg(key)
                .arg(now)
                .arg(node_id)
                .ignore()
                .cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(&stale)
                .ignore()
                .query_async(conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }
}

#[async_trait]
impl Driver for RedisZSetDriver {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn ttl(&self) -> Duration {
        self.options.ttl
    }

    async fn start(&self) -> Result<()> {
        self.heartbeat.claim()?;

        let key = self.key.clone();
        let mut conn = self.conn.clone();
        let (ttl, limit) = (self.options.ttl, self.options.op_timeout);
        if let Err(e) = Self::beat(&mut conn, &key, &self.node_id, ttl, limit).await {
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
                Box::pin(async move { Self::beat(&mut conn, &key, &node_id, ttl, limit).await })
            }),
        );
        debug!(node_id = %self.node_id, key = %self.key, "redis zset driver started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.heartbeat.stop().await {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let removed = store_call("deregister", &self.key, self.options.op_timeout, async {
            let _: () = redis::cmd("ZREM")
                .arg(&self.key)
                .arg(&self.node_id)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await;
        if let Err(e) = removed {
            warn!(node_id = %self.node_id, error = %e, "failed to remove node from collection");
        }
        Ok(())
    }

    async fn get_nodes(&self) -> Result<Vec<String>> {
        let since = live_since(Utc::now().timestamp_millis(), self.options.ttl);
        let mut conn = self.conn.clone();
        store_call("get_nodes", &self.key, self.options.op_timeout, async {
            let nodes: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(&self.key)
                .arg(format!("({}", since))
                .arg("+inf")
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(nodes)
        })
        .await
    }
}

fn collection_key(prefix: &str, service_name: &str) -> String {
    format!("{}{}", prefix, service_name)
}

/// Oldest score still considered alive at `now_ms`.
fn live_since(now_ms: i64, ttl: Duration) -> i64 {
    now_ms - ttl.as_millis() as i64
}
