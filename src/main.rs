use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod config;
mod dashboard;
mod fetcher;
mod refresh;
mod snapshot;

use config::{Config, FetcherKind};
use dashboard::AppState;
use fetcher::{CommandFetcher, FeedFetcher, PointsFetcher};
use refresh::{spawn_scheduled_refresh, RefreshCoordinator, RefreshOutcome, Trigger};
use snapshot::SnapshotFile;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let fetcher: Arc<dyn PointsFetcher> = match config.fetcher {
        FetcherKind::Feed => Arc::new(FeedFetcher::new(&config.feed_url)?),
        FetcherKind::Command => Arc::new(CommandFetcher::new(
            &config.fetch_command,
            &config.fetch_workdir,
            &config.fetch_output,
        )),
    };
    info!("Player points source: {}", fetcher.name());

    if config.refresh_secret.is_none() {
        info!("REFRESH_SECRET not set – manual refresh is disabled");
    }
    if config.refresh_on_read {
        info!("Read-time refresh enabled (TTL {}s)", config.cache_ttl_secs);
    }

    let coordinator = RefreshCoordinator::new(
        fetcher,
        config.refresh_policy(),
        config.refresh_secret.clone(),
        Some(SnapshotFile::new(&config.snapshot_path)),
    );

    // Startup refresh: persisted data (if any) is served until it lands
    if let RefreshOutcome::Started = coordinator.ensure_fresh(Trigger::Startup) {
        info!("Initial refresh running in background");
    }
    spawn_scheduled_refresh(coordinator.clone(), config.refresh_interval())?;

    let app = dashboard::router(AppState { coordinator }, &config.static_dir);
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("========================================");
    info!("Fantasy points server running!");
    info!("Dashboard: http://{}", addr);
    info!("API:       http://{}/api/players", addr);
    info!("========================================");

    // Run HTTP server (blocks until shutdown)
    axum::serve(listener, app).await?;

    Ok(())
}
