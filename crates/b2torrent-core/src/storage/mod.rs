//! Local persistence for settings and the transfer mirror.
//!
//! The mirror is a convenience copy written when snapshots are served. It
//! is wiped on startup, cleanup and shutdown so transfer metadata never
//! outlives the process.

mod database;
mod schema;

pub use database::{Database, DatabaseConfig, TorrentRecord};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "b2torrent.db";

/// Setting keys exposed through the settings API.
pub const SETTING_KEYS: &[&str] = &[
    "max_download_rate",
    "max_upload_rate",
    "max_connections",
    "enable_tor",
    "download_path",
];
