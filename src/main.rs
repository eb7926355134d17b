//! imcron - distributed cron service for the IM backend.
//!
//! Main entry point for the imcron CLI and server.

mod app;
mod cli;
mod shutdown;

use clap::Parser;
use imcron_config::{ConfigLoader, ConfigValidator, LoggingConfig};
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::BoxError;
use crate::cli::{Cli, Commands};

fn init_tracing(logging: &LoggingConfig) -> Result<(), BoxError> {
    // RUST_LOG wins over the configured level.
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    let file_layer = match &logging.dir {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("imcron")
                .filename_suffix("log")
                .max_log_files(30)
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer flushing for the life of the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(())
}

fn check_config(config: &imcron_config::Config) -> Result<(), BoxError> {
    let result = ConfigValidator::validate(config);
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }
    result.into_result()?;
    println!(
        "configuration ok: service '{}', {:?} driver, listening on {}:{}",
        config.dcron.service_name, config.dcron.driver, config.server.host, config.server.port
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;

    match cli.command.unwrap_or_default() {
        Commands::CheckConfig => check_config(&config),
        Commands::Run { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            init_tracing(&config.logging)?;
            for warning in ConfigValidator::validate(&config).into_result()? {
                warn!(path = %warning.path, "{}", warning.message);
            }
            app::run(config).await
        }
    }
}
