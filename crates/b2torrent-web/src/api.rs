//! REST API endpoints
//!
//! Handlers translate between JSON and [`SessionManager`] operations and
//! mirror every snapshot they return into the database. Error bodies carry
//! generic text only; causes are logged.
//!
//! [`SessionManager`]: b2torrent_core::session::SessionManager

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use b2torrent_core::engine::InfoHash;
use b2torrent_core::logging::RedactedHash;
use b2torrent_core::session::TransferSnapshot;
use b2torrent_core::Error;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::*;

/// A failed request: status plus generic body text.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Torrent not found")
    }

    /// Map a core error; `failure` is the body for server-side failures.
    fn from_error(err: &Error, failure: &'static str) -> Self {
        match err {
            Error::Validation(_) => Self::bad_request("Invalid request"),
            Error::NotFound(_) => Self::not_found(),
            _ => {
                error!(error = %err, detail = %err.detail(), "{}", failure);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, failure)
            }
        }
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Parse a path identifier. A malformed id can never name a live transfer.
fn parse_id(raw: &str) -> Result<InfoHash, ApiError> {
    raw.parse().map_err(|_| ApiError::not_found())
}

async fn mirror(state: &AppState, snapshots: &[TransferSnapshot]) {
    let db = state.database.lock().await;
    for snapshot in snapshots {
        if let Err(e) = db.save_torrent(snapshot) {
            warn!(
                info_hash = %RedactedHash(&snapshot.info_hash.to_hex()),
                error = %e,
                "Failed to mirror transfer"
            );
        }
    }
}

/// `POST /api/torrents`
pub async fn add_torrent(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddTorrentRequest>, JsonRejection>,
) -> ApiResult<AddTorrentResponse> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("Invalid request body"))?;

    if request.magnet_uri.trim().is_empty() {
        return Err(ApiError::bad_request("Magnet URI is required"));
    }

    let info_hash = state
        .manager
        .add_transfer(&request.magnet_uri)
        .await
        .map_err(|e| ApiError::from_error(&e, "Failed to add torrent"))?;

    Ok(Json(AddTorrentResponse {
        info_hash: info_hash.to_hex(),
    }))
}

/// `GET /api/torrents`
pub async fn list_torrents(State(state): State<Arc<AppState>>) -> Json<Vec<TransferSnapshot>> {
    let snapshots = state.manager.list_transfers().await;
    mirror(&state, &snapshots).await;
    Json(snapshots)
}

/// `GET /api/torrents/:info_hash`
pub async fn get_torrent(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> ApiResult<TransferSnapshot> {
    let id = parse_id(&info_hash)?;
    let snapshot = state
        .manager
        .get_transfer(&id)
        .await
        .map_err(|e| ApiError::from_error(&e, "Failed to get torrent"))?;

    mirror(&state, std::slice::from_ref(&snapshot)).await;
    Ok(Json(snapshot))
}

/// `DELETE /api/torrents/:info_hash`
pub async fn delete_torrent(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> ApiResult<MessageResponse> {
    let id = parse_id(&info_hash)?;
    state
        .manager
        .remove_transfer(&id)
        .await
        .map_err(|e| ApiError::from_error(&e, "Failed to remove torrent"))?;

    let db = state.database.lock().await;
    if let Err(e) = db.delete_torrent(&id.to_hex()) {
        error!(info_hash = %RedactedHash(&id.to_hex()), error = %e, "Failed to delete mirrored torrent");
    }

    Ok(Json(MessageResponse::new("Torrent removed")))
}

/// `POST /api/torrents/:info_hash/pause`
pub async fn pause_torrent(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> ApiResult<MessageResponse> {
    let id = parse_id(&info_hash)?;
    state
        .manager
        .pause_transfer(&id)
        .await
        .map_err(|e| ApiError::from_error(&e, "Failed to pause torrent"))?;

    Ok(Json(MessageResponse::new("Torrent paused")))
}

/// `POST /api/torrents/:info_hash/resume`
pub async fn resume_torrent(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> ApiResult<MessageResponse> {
    let id = parse_id(&info_hash)?;
    state
        .manager
        .resume_transfer(&id)
        .await
        .map_err(|e| ApiError::from_error(&e, "Failed to resume torrent"))?;

    Ok(Json(MessageResponse::new("Torrent resumed")))
}

/// `GET /api/settings`
pub async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResult<BTreeMap<String, String>> {
    let db = state.database.lock().await;
    db.get_settings()
        .map(Json)
        .map_err(|e| ApiError::from_error(&e, "Failed to load settings"))
}

/// `PUT /api/settings`
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateSettingsRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let Json(request) = payload.map_err(|_| ApiError::bad_request("Invalid request body"))?;

    let db = state.database.lock().await;
    for (key, value) in request.entries() {
        db.set_setting(key, value)
            .map_err(|e| ApiError::from_error(&e, "Failed to update settings"))?;
    }

    Ok(Json(MessageResponse::new("Settings updated")))
}

/// `GET /api/health`
///
/// Reports the per-hop check only. The service itself is always healthy
/// when it can answer.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let tor = match state.prober.test_proxy_chain().await {
        Ok(()) => "enabled",
        Err(e) => {
            warn!(error = %e, "Proxy chain not working");
            "disabled"
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        tor: tor.to_string(),
    })
}

/// `POST /api/cleanup`
pub async fn cleanup(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    let cleared = state.manager.shutdown().await;

    let db = state.database.lock().await;
    let rows = db
        .clear_active_torrents()
        .map_err(|e| ApiError::from_error(&e, "Failed to cleanup data"))?;

    info!(sessions = cleared, rows, "Cleanup complete");
    Ok(Json(MessageResponse::new("All data cleaned")))
}
