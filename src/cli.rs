//! CLI definitions for imcron.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// imcron CLI.
#[derive(Parser)]
#[command(name = "imcron")]
#[command(about = "Distributed cron service for the IM backend")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: <config dir>/imcron/config.toml)
    #[arg(short, long, env = "IMCRON_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Join the fleet and serve the cron API (default)
    Run {
        /// Server host, overrides [server].host
        #[arg(long)]
        host: Option<String>,

        /// Server port, overrides [server].port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            host: None,
            port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["imcron"]).unwrap();
        assert_eq!(cli.command.unwrap_or_default(), Commands::default());
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from(["imcron", "run", "--host", "0.0.0.0", "--port", "10088"])
            .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Run {
                host: Some("0.0.0.0".to_string()),
                port: Some(10088),
            })
        );
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["imcron", "check-config", "--config", "/etc/imcron.toml"])
            .unwrap();
        assert_eq!(cli.command, Some(Commands::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/imcron.toml")));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["imcron", "run", "--port", "70000"]).is_err());
    }
}
