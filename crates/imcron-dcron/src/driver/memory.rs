//! Process-local membership driver.
//!
//! Several [`MemoryDriver`]s sharing one [`MemoryRegistry`] behave like
//! several processes sharing one store, which is how the cluster tests run a
//! fleet inside a single test binary. Expiry follows the tokio clock so
//! paused-time tests can step through TTL windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Driver, HeartbeatSlot, generate_node_id};
use crate::error::{DcronError, Result};

#[derive(Default)]
struct RegistryInner {
    /// service -> node -> registration expiry
    services: HashMap<String, HashMap<String, Instant>>,
    unreachable: bool,
}

/// Shared in-memory liveness store.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: every call fails until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    fn heartbeat(&self, service: &str, node_id: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.unreachable {
            return Err(DcronError::Unavailable("memory registry".to_string()));
        }
        inner
            .services
            .entry(service.to_string())
            .or_default()
            .insert(node_id.to_string(), Instant::now() + ttl);
        Ok(())
    }

    fn remove(&self, service: &str, node_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.unreachable {
            return Err(DcronError::Unavailable("memory registry".to_string()));
        }
        if let Some(nodes) = inner.services.get_mut(service) {
            nodes.remove(node_id);
        }
        Ok(())
    }

    fn live_nodes(&self, service: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        if inner.unreachable {
            return Err(DcronError::Unavailable("memory registry".to_string()));
        }
        let now = Instant::now();
        let Some(nodes) = inner.services.get_mut(service) else {
            return Ok(Vec::new());
        };
        nodes.retain(|_, expires| *expires > now);
        Ok(nodes.keys().cloned().collect())
    }
}

/// Driver over a [`MemoryRegistry`].
pub struct MemoryDriver {
    registry: MemoryRegistry,
    service_name: String,
    node_id: String,
    ttl: Duration,
    heartbeat: HeartbeatSlot,
}

impl MemoryDriver {
    pub fn new(registry: MemoryRegistry, service_name: impl Into<String>, ttl: Duration) -> Self {
        let service_name = service_name.into();
        Self {
            node_id: generate_node_id(&service_name),
            registry,
            service_name,
            ttl,
            heartbeat: HeartbeatSlot::new(),
        }
    }

    /// Stop heartbeating without deregistering, as a crashed process would.
    /// The node disappears from snapshots once its TTL runs out.
    pub async fn halt(&self) {
        if self.heartbeat.stop().await {
            info!(node_id = %self.node_id, "heartbeat halted");
        }
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn start(&self) -> Result<()> {
        self.heartbeat.claim()?;
        if let Err(e) = self
            .registry
            .heartbeat(&self.service_name, &self.node_id, self.ttl)
        {
            self.heartbeat.release();
            return Err(e);
        }

        let registry = self.registry.clone();
        let service = self.service_name.clone();
        let node_id = self.node_id.clone();
        let ttl = self.ttl;
        self.heartbeat.spawn(
            self.node_id.clone(),
            self.ttl / 2,
            Box::new(move || {
                let result = registry.heartbeat(&service, &node_id, ttl);
                Box::pin(async move { result })
            }),
        );
        debug!(node_id = %self.node_id, "memory driver started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.heartbeat.stop().await {
            if let Err(e) = self.registry.remove(&self.service_name, &self.node_id) {
                debug!(node_id = %self.node_id, error = %e, "deregistration skipped");
            }
        }
        Ok(())
    }

    async fn get_nodes(&self) -> Result<Vec<String>> {
        self.registry.live_nodes(&self.service_name)
    }
}
