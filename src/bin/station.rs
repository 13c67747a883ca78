//! Radio Station
//!
//! Serves a music directory as one looping, clock-synchronized program over
//! HTTP.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_sync::{
    broadcast::Station,
    catalog::TrackCatalog,
    config::AppConfig,
    constants::FALLBACK_RESCAN_INTERVAL_SECS,
    http::WebServer,
    source::{DirectorySource, LoftyProbe},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Radio Station");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let library = &config.library;
    tracing::info!("Music directory: {}", library.music_dir.display());
    let source = Arc::new(DirectorySource::new(&library.music_dir, &library.extensions));
    let probe = Arc::new(LoftyProbe::new(&library.music_dir));
    let catalog = TrackCatalog::build(
        source,
        probe,
        library.fallback_duration_secs,
        library.music_dir.display().to_string(),
    )
    .await
    .context("Cannot start without tracks")?;
    let catalog = Arc::new(catalog);

    let shutdown = CancellationToken::new();
    let mut rescan_secs = library.rescan_interval_secs;
    if library.watch {
        let watched = catalog.spawn_fs_watcher(
            &library.music_dir,
            library.watch_debounce(),
            shutdown.clone(),
        );
        if let Err(e) = watched {
            tracing::warn!("{}; falling back to periodic rescans", e);
            if rescan_secs == 0 {
                rescan_secs = FALLBACK_RESCAN_INTERVAL_SECS;
            }
        }
    }
    if rescan_secs > 0 {
        catalog.spawn_watcher(Duration::from_secs(rescan_secs), shutdown.clone());
    }

    let station = Station::new(&config, catalog);
    if config.broadcast.autostart {
        station.start_broadcast();
    }

    tracing::info!(
        "Stream available at http://{}:{}/stream",
        config.server.bind_address,
        config.server.http_port
    );

    let server = WebServer::new(config.server.clone(), station.clone());
    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    station.stop_broadcast();
    tracing::info!("Station stopped");

    Ok(())
}
