//! ---
//! carlink_section: "01-core-functionality"
//! carlink_subsection: "binary"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Binary entrypoint for the CarLink relay daemon."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use carlink_api::RelayServerBuilder;
use carlink_common::config::AppConfig;
use carlink_common::logging::{init_tracing, LogFormat};
use carlink_hub::{CarHub, HubPolicy};
use carlink_metrics::{new_registry, spawn_http_server, DaemonMetrics, HubMetrics, SharedRegistry};
use carlink_telemetry::{InMemoryTelemetryCache, TelemetryCache};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "CarLink relay daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the REST and hub listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    StructuredJson,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::StructuredJson => LogFormat::StructuredJson,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the relay server")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/carlinkd.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let config_path = loaded_config.source;
    let load_duration = load_started.elapsed();

    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    init_tracing("carlinkd", &config.logging)?;

    match &config_path {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("configuration defaults in effect"),
    }

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(&metrics_registry)?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            daemon_metrics.inc_start();
            run_daemon(config, metrics_registry).await?
        }
        Commands::CheckConfig => {
            println!(
                "Configuration OK\nSource: {}\nListen: {}\nHub path: {}",
                config_path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "built-in defaults".to_owned()),
                config.server.listen,
                config.server.hub_path
            );
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let metrics_settings = config.metrics.clone();

    let metrics_server = if metrics_settings.enabled {
        match spawn_http_server(metrics_registry.clone(), metrics_settings.listen).await {
            Ok(server) => {
                info!(address = %server.addr(), "metrics exporter enabled");
                Some(server)
            }
            Err(err) => {
                warn!(error = %err, "failed to start metrics exporter");
                None
            }
        }
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let telemetry: Arc<dyn TelemetryCache> = Arc::new(InMemoryTelemetryCache::new());
    let hub = Arc::new(
        CarHub::new(Arc::clone(&telemetry), HubPolicy::from(&config.hub))
            .with_metrics(HubMetrics::new(&metrics_registry)?),
    );

    let server = RelayServerBuilder::new(&config, Arc::clone(&hub), telemetry)
        .spawn()
        .await?;
    info!(
        address = %server.local_addr(),
        hub_path = %config.server.hub_path,
        "relay running; waiting for termination signal"
    );

    signal::ctrl_c().await?;
    info!(connections = hub.connection_count(), "ctrl-c received; shutting down");
    server.shutdown().await?;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}
