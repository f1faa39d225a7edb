//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
pub const CREATE_SCHEMA: &str = r#"
-- Mirror of live transfers
CREATE TABLE IF NOT EXISTS active_torrents (
    info_hash TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    downloaded INTEGER NOT NULL,
    uploaded INTEGER NOT NULL,
    download_rate INTEGER NOT NULL,
    upload_rate INTEGER NOT NULL,
    progress REAL NOT NULL,
    status TEXT NOT NULL,
    magnet_uri TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_active_torrents_created ON active_torrents(created_at);

-- Settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Schema version
INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES ('schema_version', '?', 0);
"#;
