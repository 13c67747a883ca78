//! Router and server lifecycle

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::broadcast::Station;
use crate::config::ServerConfig;
use crate::error::Result;

/// Shared handler state
pub struct AppState {
    pub station: Arc<Station>,
}

pub struct WebServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: ServerConfig, station: Arc<Station>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { station }),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Listener streams never end on their own, so the broadcast is stopped
    /// before the server drains its connections.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("HTTP server listening on http://{}", addr);

        let station = self.state.station.clone();
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutting down HTTP server");
                station.stop_broadcast();
            })
            .await?;
        Ok(())
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(handlers::stream_audio))
        .route("/status", get(handlers::get_status))
        .route("/api/tracks", get(handlers::get_tracks))
        .route("/api/catalog/rescan", post(handlers::rescan_catalog))
        .route("/start-broadcast", post(handlers::start_broadcast))
        .route("/stop-broadcast", post(handlers::stop_broadcast))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
