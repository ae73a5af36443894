//! Panoptes Binary Entry Point
//!
//! This binary runs the complete telemetry agent. Core functionality is
//! provided by the `panoptes` library crate.

use clap::Parser;
use panoptes::config::{AppConfig, RuntimeMode};
use panoptes::supervisor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Panoptes - telemetry agent for the PostgreSQL ecosystem
#[derive(Parser, Debug)]
#[command(name = "panoptes", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PANOPTES_CONFIG")]
    config: Option<String>,

    /// Dispatch mode (overrides config file)
    #[arg(long, value_enum)]
    mode: Option<RuntimeMode>,

    /// Pull listen address (overrides config file)
    #[arg(long)]
    listen: Option<String>,

    /// Push destination base URL (overrides config file)
    #[arg(long, env = "METRIC_SERVICE_BASE_URL")]
    metric_service_url: Option<String>,

    /// Push cadence, e.g. "60s" (overrides config file)
    #[arg(long, env = "SEND_INTERVAL")]
    send_interval: Option<String>,

    /// API key attached to push requests
    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    /// Project label attached to every metric
    #[arg(long, env = "PROJECTID")]
    project_id: Option<String>,

    /// Install the agent as a host service and exit
    #[arg(long)]
    bootstrap_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,panoptes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Bootstrap mode installs the host service and exits.
    if let Some(key) = &cli.bootstrap_key {
        if let Err(e) = panoptes::bootstrap::install(key) {
            tracing::error!(error = %e, "bootstrap failed");
            std::process::exit(1);
        }
        return Ok(());
    }

    // Load configuration (CLI > ENV > config file)
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("loading configuration from: {path}");
            AppConfig::load(path)?
        }
        None => AppConfig {
            credentials: panoptes::Credentials::from_env(),
            ..AppConfig::default()
        },
    };

    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(url) = cli.metric_service_url {
        config.metric_service_url = Some(url);
    }
    if let Some(interval) = cli.send_interval {
        config.send_interval = humantime::parse_duration(&interval)
            .map_err(|e| format!("invalid --send-interval: {e}"))?;
    }
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }
    if let Some(project) = cli.project_id {
        config.project_id = Some(project);
    }

    config.validate()?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    supervisor::run(config, token).await
}

/// Cancel the root token on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("received terminate signal");
        }
    }

    token.cancel();
}
