//! HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::routes::create_router;
use crate::service::CronService;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl ApiConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Serves the cron RPC surface until the shutdown future completes.
pub struct ApiServer {
    config: ApiConfig,
    service: Arc<CronService>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, service: Arc<CronService>) -> Self {
        Self { config, service }
    }

    /// Get the server address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Bind the configured address and serve.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self.addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener. In-flight requests finish after
    /// `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("API server listening on {}", listener.local_addr()?);
        axum::serve(listener, create_router(self.service.clone()))
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("API server stopped");
        Ok(())
    }
}
