//! mowerlink - main entry point
//!
//! Loads configuration, starts the bridge against the configured broker and
//! runs until SIGINT or SIGTERM.

use mowerlink::config::BridgeConfig;
use mowerlink::observability::init_default_logging;
use mowerlink::state::ChangeSet;
use mowerlink::{Bridge, BridgeError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info};

/// Default configuration search locations, in order
const DEFAULT_CONFIG_PATHS: &[&str] = &["mowerlink.toml", "config/mowerlink.toml"];

/// MQTT telemetry bridge for robot lawn mowers
#[derive(Parser)]
#[command(name = "mowerlink")]
#[command(about = "Ingest robot mower telemetry from MQTT and keep a reconciled device state")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker host, overriding the configuration file
    #[arg(long, env = "MOWERLINK_BROKER_HOST", global = true)]
    broker_host: Option<String>,

    /// Broker port, overriding the configuration file
    #[arg(long, env = "MOWERLINK_BROKER_PORT", global = true)]
    broker_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mowerlink v{}", env!("CARGO_PKG_VERSION"));

    // A bad broker address is the one startup error we refuse to run with
    let config = match load_configuration(cli.config.as_deref(), cli.broker_host, cli.broker_port)
    {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        let rejected_config = e
            .downcast_ref::<BridgeError>()
            .is_some_and(BridgeError::is_configuration_error);
        if rejected_config {
            error!("Bridge rejected its configuration: {}", e);
        } else {
            error!("Command failed: {}", e);
        }
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
    broker_host: Option<String>,
    broker_port: Option<u16>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            BridgeConfig::parse_file(&path)?
        }
        None => match &broker_host {
            Some(host) => {
                info!("No configuration file found, using defaults for broker {}", host);
                BridgeConfig::for_broker(host.clone(), 1883)
            }
            None => {
                return Err(
                    "No configuration file found. Provide one with -c/--config, create mowerlink.toml, or pass --broker-host"
                        .into(),
                );
            }
        },
    };

    config.apply_broker_overrides(broker_host, broker_port);
    config.validate()?;
    Ok(config)
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut bridge = Bridge::with_mqtt(config)?;

    // Stand-in consumer until a host platform registers its own observer
    let mut changes = bridge.subscribe();
    let change_logger = tokio::spawn(async move {
        while let Some(change_set) = changes.recv().await {
            log_change_set(&change_set);
        }
    });

    bridge.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Bridge is running and waiting for mower telemetry...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    let result = bridge.shutdown().await;
    info!(devices = bridge.list().len(), "Final device count");
    change_logger.abort();

    result.map_err(Into::into)
}

fn log_change_set(change_set: &ChangeSet) {
    for change in &change_set.changed_fields {
        info!(
            device_id = %change_set.device_id,
            field = change.field.as_str(),
            old = ?change.old,
            new = ?change.new,
            "Device field changed"
        );
    }
    if let Some(connection) = &change_set.connection_change {
        info!(
            device_id = %change_set.device_id,
            old = ?connection.old,
            new = ?connection.new,
            "Device connection status changed"
        );
    }
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        filters = ?config.topic_matcher()?.subscription_filters(),
        "Configuration validation complete"
    );
    Ok(())
}
