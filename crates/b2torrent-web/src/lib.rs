//! B-2 Torrent Web API
//!
//! HTTP surface over the session manager. Every route is throttled per
//! route template and every response carries no-cache and hardening headers.
//!
//! | Method   | Path                              | Handler                 |
//! |----------|-----------------------------------|-------------------------|
//! | `POST`   | `/api/torrents`                   | [`api::add_torrent`]    |
//! | `GET`    | `/api/torrents`                   | [`api::list_torrents`]  |
//! | `GET`    | `/api/torrents/:info_hash`        | [`api::get_torrent`]    |
//! | `DELETE` | `/api/torrents/:info_hash`        | [`api::delete_torrent`] |
//! | `POST`   | `/api/torrents/:info_hash/pause`  | [`api::pause_torrent`]  |
//! | `POST`   | `/api/torrents/:info_hash/resume` | [`api::resume_torrent`] |
//! | `GET`    | `/api/settings`                   | [`api::get_settings`]   |
//! | `PUT`    | `/api/settings`                   | [`api::update_settings`]|
//! | `GET`    | `/api/health`                     | [`api::health`]         |
//! | `POST`   | `/api/cleanup`                    | [`api::cleanup`]        |

pub mod api;
pub mod middleware;
pub mod models;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use b2torrent_core::proxy::ChainProber;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;

use models::AppState;

/// Build the application router with all middleware applied.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/torrents", get(api::list_torrents).post(api::add_torrent))
        .route(
            "/api/torrents/:info_hash",
            get(api::get_torrent).delete(api::delete_torrent),
        )
        .route("/api/torrents/:info_hash/pause", post(api::pause_torrent))
        .route("/api/torrents/:info_hash/resume", post(api::resume_torrent))
        .route("/api/settings", get(api::get_settings).put(api::update_settings))
        .route("/api/health", get(api::health))
        .route("/api/cleanup", post(api::cleanup))
        .layer(RequestBodyLimitLayer::new(middleware::BODY_LIMIT))
        .layer(from_fn_with_state(Arc::clone(&state), middleware::rate_limit_middleware))
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(middleware::cors_layer())
        .with_state(state)
}

/// Dial the composed route once in the background and log the outcome.
///
/// Returns at once; the check runs on its own task.
pub fn spawn_route_check(prober: ChainProber) -> JoinHandle<()> {
    tokio::spawn(async move {
        match prober.test_composed_route().await {
            Ok(()) => tracing::info!("Composed proxy route verified"),
            Err(e) => tracing::warn!(error = %e, "Composed proxy route check failed"),
        }
    })
}
