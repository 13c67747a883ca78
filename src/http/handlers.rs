//! HTTP API handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::server::AppState;
use crate::broadcast::StationStatus;
use crate::catalog::Track;
use crate::error::Error;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Result of a start or stop request
#[derive(Serialize)]
pub struct BroadcastState {
    pub broadcasting: bool,
    /// False when the request found the station already in that state
    pub changed: bool,
    pub epoch: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct RescanResult {
    pub changed: bool,
    pub catalog_version: u64,
    pub track_count: usize,
}

/// Live audio for one listener
pub async fn stream_audio(State(state): State<Arc<AppState>>) -> Response {
    match state.station.connect_listener() {
        Ok(stream) => (
            [
                (header::CONTENT_TYPE, "audio/mpeg"),
                (header::CACHE_CONTROL, "no-cache, no-transform"),
            ],
            Body::from_stream(stream),
        )
            .into_response(),
        Err(Error::NotBroadcasting) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error("Broadcast is not running")),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error(e.to_string())),
        )
            .into_response(),
    }
}

/// Get station status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StationStatus>> {
    Json(ApiResponse::ok(state.station.status()))
}

/// Get all tracks in playback order
pub async fn get_tracks(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Track>>> {
    let catalog = state.station.catalog().snapshot();
    Json(ApiResponse::ok(catalog.tracks().to_vec()))
}

/// Rescan the library now
pub async fn rescan_catalog(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<RescanResult>>) {
    let catalog = state.station.catalog();
    match catalog.rebuild().await {
        Ok(changed) => (
            StatusCode::OK,
            Json(ApiResponse::ok(RescanResult {
                changed,
                catalog_version: catalog.version(),
                track_count: catalog.snapshot().len(),
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

pub async fn start_broadcast(State(state): State<Arc<AppState>>) -> Json<ApiResponse<BroadcastState>> {
    let changed = state.station.start_broadcast();
    Json(ApiResponse::ok(BroadcastState {
        broadcasting: true,
        changed,
        epoch: state.station.clock().map(|c| c.epoch()),
    }))
}

pub async fn stop_broadcast(State(state): State<Arc<AppState>>) -> Json<ApiResponse<BroadcastState>> {
    let changed = state.station.stop_broadcast();
    Json(ApiResponse::ok(BroadcastState {
        broadcasting: false,
        changed,
        epoch: None,
    }))
}
