use anyhow::{Context, Result};
use clap::Parser;
use reviewer_service::config::Config;
use reviewer_service::services::http_server::start_server;
use reviewer_service::services::{ApiState, ReviewerStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Reviewer assignment service
#[derive(Parser, Debug)]
#[command(name = "reviewer-service")]
#[command(about = "Assigns pull request reviewers within teams", long_about = None)]
struct Cli {
    /// Apply database migrations and exit
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    // RUST_LOG wins over LOG_LEVEL; `log` records are bridged by tracing-subscriber.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = ReviewerStore::connect(&config.store)
        .await
        .with_context(|| format!("Failed to open database {}", config.store.db_path.display()))?;

    if cli.migrate_only {
        log::info!("[main] migrations applied to {}", config.store.db_path.display());
        store.close().await;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[main] failed to listen for shutdown signal: {}", e);
            return;
        }
        log::info!("[main] received shutdown signal");
        signal_token.cancel();
    });

    let state = ApiState::new(store.clone(), config.request_timeout);
    let served = start_server(&config.bind_addr(), state, shutdown)
        .await
        .with_context(|| format!("HTTP server on {} failed", config.bind_addr()));

    store.close().await;
    served
}
