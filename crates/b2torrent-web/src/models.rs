//! Data models for the web API

use b2torrent_core::proxy::ChainProber;
use b2torrent_core::rate_limit::RateLimiter;
use b2torrent_core::session::SessionManager;
use b2torrent_core::storage::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

/// Application shared state
pub struct AppState {
    /// Live transfers
    pub manager: Arc<SessionManager>,
    /// Settings and transfer mirror
    pub database: Arc<TokioMutex<Database>>,
    /// Per-hop health checks for `/api/health`
    pub prober: ChainProber,
    /// Per-route request throttling
    pub limiter: Arc<RateLimiter>,
}

/// API request to add a transfer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentRequest {
    #[serde(default)]
    pub magnet_uri: String,
}

/// Response to a successful add
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentResponse {
    pub info_hash: String,
}

/// API request to update settings. Empty or missing fields are left alone.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub max_download_rate: Option<String>,
    pub max_upload_rate: Option<String>,
    pub max_connections: Option<String>,
    pub enable_tor: Option<String>,
    pub download_path: Option<String>,
}

impl UpdateSettingsRequest {
    /// `(storage key, value)` pairs for every non-empty field.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("max_download_rate", &self.max_download_rate),
            ("max_upload_rate", &self.max_upload_rate),
            ("max_connections", &self.max_connections),
            ("enable_tor", &self.enable_tor),
            ("download_path", &self.download_path),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect()
    }
}

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `enabled` when every proxy hop answered, otherwise `disabled`
    pub tor: String,
}
