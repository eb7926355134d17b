//! Process wiring: configuration in, running scheduler and API out.

use std::sync::Arc;
use std::time::Duration;

use imcron_api::{
    ApiConfig, ApiServer, CronService, GatewayConfig, HttpMessageGateway, ImJobRecoverer,
    MessageGateway, Retire, Retirement,
};
use imcron_config::{Config, DriverKind};
use imcron_dcron::{
    Dcron, DcronOptions, Driver, JobStore, MemoryDriver, MemoryJobStore, MemoryRegistry,
    RedisDriverOptions, RedisJobStore, RedisKeyDriver, RedisZSetDriver,
};
use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::shutdown::SignalHandler;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on leaving the fleet and draining HTTP requests.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything a node runs, built but not started.
pub(crate) struct App {
    pub(crate) dcron: Arc<Dcron>,
    pub(crate) service: Arc<CronService>,
    pub(crate) retired: mpsc::UnboundedReceiver<Retirement>,
    pub(crate) api: ApiConfig,
}

impl App {
    pub(crate) async fn build(config: &Config) -> Result<Self, BoxError> {
        let gateway: Arc<dyn MessageGateway> = Arc::new(HttpMessageGateway::new(
            GatewayConfig::new(&config.jobs.gateway_url)
                .with_request_timeout(config.jobs.request_timeout()),
        )?);
        let (retire, retired) = Retire::channel();

        let (driver, store) = backend(config).await?;
        let dcron = Dcron::new(driver, dcron_options(config))?
            .with_store(store)
            .with_recoverer(Arc::new(ImJobRecoverer::new(gateway.clone(), retire.clone())));
        let dcron = Arc::new(dcron);

        let service = Arc::new(CronService::new(
            dcron.clone(),
            gateway,
            retire,
            config.jobs.voice_channel_idle_minutes,
        ));

        Ok(Self {
            dcron,
            service,
            retired,
            api: ApiConfig::new(&config.server.host, config.server.port),
        })
    }
}

fn dcron_options(config: &Config) -> DcronOptions {
    let dcron = &config.dcron;
    DcronOptions::new(&dcron.service_name)
        .with_hash_replicas(dcron.hash_replicas)
        .with_update_interval(dcron.update_interval())
        .with_startup_wait(dcron.startup_wait())
        .with_stop_grace(dcron.stop_grace())
        .with_recent_jobs_capacity(dcron.recent_jobs_capacity)
        .with_sync_interval(dcron.sync_interval())
}

async fn backend(config: &Config) -> Result<(Arc<dyn Driver>, Arc<dyn JobStore>), BoxError> {
    let service_name = config.dcron.service_name.as_str();
    let ttl = config.dcron.node_ttl();

    if config.dcron.driver == DriverKind::Memory {
        let driver = MemoryDriver::new(MemoryRegistry::new(), service_name, ttl);
        return Ok((Arc::new(driver), Arc::new(MemoryJobStore::new())));
    }

    let client = redis::Client::open(config.redis.url.as_str())?;
    let conn = ConnectionManager::new(client).await?;
    info!(url = %config.redis.url, driver = ?config.dcron.driver, "connected to redis");

    let options = RedisDriverOptions {
        key_prefix: config.redis.key_prefix.clone(),
        ttl,
        op_timeout: config.redis.op_timeout(),
    };
    let driver: Arc<dyn Driver> = match config.dcron.driver {
        DriverKind::Key => Arc::new(RedisKeyDriver::new(conn.clone(), service_name, options)),
        _ => Arc::new(RedisZSetDriver::new(conn.clone(), service_name, options)),
    };
    let store = RedisJobStore::new(conn, &config.redis.key_prefix, config.redis.op_timeout());
    Ok((driver, Arc::new(store)))
}

/// Serve until SIGINT/SIGTERM, then leave the fleet.
pub(crate) async fn run(config: Config) -> Result<(), BoxError> {
    let App {
        dcron,
        service,
        retired,
        api,
    } = App::build(&config).await?;

    let signals = SignalHandler::new();
    signals.setup_os_signals()?;

    let server = ApiServer::new(api, service.clone());
    let listener = TcpListener::bind(server.addr()).await?;
    let server_signals = signals.clone();
    let server_task = tokio::spawn(async move {
        server
            .serve(listener, async move { server_signals.wait_for_shutdown().await })
            .await
    });
    let retirements = service.spawn_retirements(retired);

    let started = tokio::select! {
        result = dcron.start() => Some(result),
        _ = signals.wait_for_shutdown() => None,
    };
    let outcome = match started {
        Some(Ok(())) => {
            info!(node_id = %dcron.node_id(), "imcron running");
            signals.wait_for_shutdown().await;
            Ok(())
        }
        Some(Err(e)) => {
            error!(error = %e, "scheduler failed to start");
            signals.request_shutdown();
            Err(e.into())
        }
        None => {
            info!("shutdown requested before the scheduler converged");
            Ok(())
        }
    };

    info!("shutting down");
    drain(&dcron, server_task).await;
    retirements.abort();
    outcome
}

async fn drain(dcron: &Dcron, server: JoinHandle<Result<(), BoxError>>) {
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Err(e) = dcron.stop().await {
            warn!(error = %e, "scheduler did not leave the fleet cleanly");
        }
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "API server failed"),
            Err(e) => error!(error = %e, "API server task panicked"),
        }
    })
    .await;

    if drained.is_err() {
        warn!("shutdown did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }
}
