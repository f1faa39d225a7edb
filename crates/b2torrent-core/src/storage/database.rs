//! SQLite operations for settings and the transfer mirror.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use super::SETTING_KEYS;
use crate::error::{Error, Result};
use crate::session::TransferSnapshot;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: super::DEFAULT_DB_NAME.to_string(),
            in_memory: false,
        }
    }
}

/// A mirrored transfer row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentRecord {
    /// Hex info-hash.
    pub info_hash: String,
    /// Display name.
    pub name: String,
    /// Content length in bytes.
    pub total_size: u64,
    /// Verified bytes.
    pub downloaded: u64,
    /// Uploaded bytes.
    pub uploaded: u64,
    /// Download rate at the last poll.
    pub download_rate: u64,
    /// Upload rate at the last poll.
    pub upload_rate: u64,
    /// Completion percentage.
    pub progress: f64,
    /// Status name.
    pub status: String,
    /// Originating descriptor.
    pub magnet_uri: String,
    /// When the transfer was added.
    pub created_at: DateTime<Utc>,
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_int(n: i64) -> u64 {
    n.max(0) as u64
}

/// Database handle.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            // Create parent directories if needed
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
            }

            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        // Deleted rows are overwritten, temp data stays in memory
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = DELETE;
            PRAGMA secure_delete = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set pragmas: {}", e)))?;

        let db = Self { conn };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    /// Upsert a snapshot. Identity columns are kept on conflict.
    pub fn save_torrent(&self, snapshot: &TransferSnapshot) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO active_torrents
                (info_hash, name, total_size, downloaded, uploaded, download_rate,
                 upload_rate, progress, status, magnet_uri, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (info_hash) DO UPDATE SET
                    downloaded = ?4,
                    uploaded = ?5,
                    download_rate = ?6,
                    upload_rate = ?7,
                    progress = ?8,
                    status = ?9
                "#,
                params![
                    snapshot.info_hash.to_hex(),
                    snapshot.name,
                    to_sql_int(snapshot.total_size),
                    to_sql_int(snapshot.downloaded),
                    to_sql_int(snapshot.uploaded),
                    to_sql_int(snapshot.download_rate),
                    to_sql_int(snapshot.upload_rate),
                    snapshot.progress,
                    snapshot.status.as_str(),
                    snapshot.magnet_uri,
                    snapshot.created_at.timestamp(),
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to save torrent: {}", e)))?;

        Ok(())
    }

    /// All mirrored transfers, newest first.
    pub fn get_all_torrents(&self) -> Result<Vec<TorrentRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT info_hash, name, total_size, downloaded, uploaded, download_rate,
                       upload_rate, progress, status, magnet_uri, created_at
                FROM active_torrents
                ORDER BY created_at DESC
                "#,
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let created_at: i64 = row.get(10)?;
                Ok(TorrentRecord {
                    info_hash: row.get(0)?,
                    name: row.get(1)?,
                    total_size: from_sql_int(row.get(2)?),
                    downloaded: from_sql_int(row.get(3)?),
                    uploaded: from_sql_int(row.get(4)?),
                    download_rate: from_sql_int(row.get(5)?),
                    upload_rate: from_sql_int(row.get(6)?),
                    progress: row.get(7)?,
                    status: row.get(8)?,
                    magnet_uri: row.get(9)?,
                    created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
                })
            })
            .map_err(|e| Error::Storage(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("failed to read torrents: {}", e)))
    }

    /// Remove one mirrored transfer.
    pub fn delete_torrent(&self, info_hash: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM active_torrents WHERE info_hash = ?", params![info_hash])
            .map_err(|e| Error::Storage(format!("failed to delete torrent: {}", e)))?;
        Ok(())
    }

    /// Remove every mirrored transfer. Returns the number of rows removed.
    pub fn clear_active_torrents(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM active_torrents", [])
            .map_err(|e| Error::Storage(format!("failed to clear active torrents: {}", e)))
    }

    /// Set a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        self.conn
            .execute(
                r#"
                INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3
                "#,
                params![key, value, now],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get a setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM settings WHERE key = ?")
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = stmt.query_row(params![key], |row| row.get(0));

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    /// The user-facing settings that have a stored value.
    pub fn get_settings(&self) -> Result<BTreeMap<String, String>> {
        let mut settings = BTreeMap::new();
        for key in SETTING_KEYS {
            if let Some(value) = self.get_setting(key)? {
                settings.insert((*key).to_string(), value);
            }
        }
        Ok(settings)
    }
}
