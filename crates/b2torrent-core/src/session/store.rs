//! Concurrency-safe map from info-hash to live session state.

use super::{TransferSnapshot, TransferStatus};
use crate::engine::{InfoHash, TorrentHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Minimum interval between samples before rates are recomputed.
const MIN_SAMPLE_MILLIS: u128 = 100;

/// Largest `f64` strictly below 100.
fn just_below_hundred() -> f64 {
    f64::from_bits(100.0_f64.to_bits() - 1)
}

/// Completion percentage clamped to `[0, 100]`; zero-length content is 0%.
///
/// Only content that is actually complete reports exactly 100.
pub fn completion_fraction(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    if completed >= total {
        return 100.0;
    }
    let fraction = (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
    fraction.min(just_below_hundred())
}

/// Status from byte counts and the pause flag.
pub fn infer_status(completed: u64, total: u64, paused: bool, upload_rate: u64) -> TransferStatus {
    if total > 0 && completed >= total {
        if upload_rate > 0 {
            TransferStatus::Seeding
        } else {
            TransferStatus::Completed
        }
    } else if paused {
        TransferStatus::Paused
    } else if completed == 0 || total == 0 {
        TransferStatus::Starting
    } else {
        TransferStatus::Downloading
    }
}

#[derive(Debug, Default)]
struct RateSample {
    taken: Option<Instant>,
    bytes_read: u64,
    bytes_written: u64,
    download_rate: u64,
    upload_rate: u64,
}

impl RateSample {
    /// Fold in new counters and return `(download, upload)` bytes/sec.
    fn update(&mut self, bytes_read: u64, bytes_written: u64, now: Instant) -> (u64, u64) {
        match self.taken {
            None => {}
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed.as_millis() < MIN_SAMPLE_MILLIS {
                    return (self.download_rate, self.upload_rate);
                }
                let secs = elapsed.as_secs_f64();
                self.download_rate = (bytes_read.saturating_sub(self.bytes_read) as f64 / secs) as u64;
                self.upload_rate = (bytes_written.saturating_sub(self.bytes_written) as f64 / secs) as u64;
            }
        }
        self.taken = Some(now);
        self.bytes_read = bytes_read;
        self.bytes_written = bytes_written;
        (self.download_rate, self.upload_rate)
    }
}

/// Live state for one transfer.
pub struct SessionEntry {
    handle: Arc<dyn TorrentHandle>,
    magnet: String,
    created_at: DateTime<Utc>,
    paused: bool,
    sample: Mutex<RateSample>,
}

impl SessionEntry {
    /// New, unpaused entry created now.
    pub fn new(handle: Arc<dyn TorrentHandle>, magnet: impl Into<String>) -> Self {
        Self {
            handle,
            magnet: magnet.into(),
            created_at: Utc::now(),
            paused: false,
            sample: Mutex::new(RateSample::default()),
        }
    }

    /// Engine handle.
    pub fn handle(&self) -> &Arc<dyn TorrentHandle> {
        &self.handle
    }

    /// Whether piece requests are currently cancelled.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Snapshot from live engine counters.
    pub fn snapshot(&self, info_hash: InfoHash) -> TransferSnapshot {
        self.snapshot_at(info_hash, Instant::now())
    }

    pub(crate) fn snapshot_at(&self, info_hash: InfoHash, now: Instant) -> TransferSnapshot {
        let stats = self.handle.stats();
        let total = self.handle.length();
        let completed = self.handle.bytes_completed();

        let (download_rate, upload_rate) = self
            .sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(stats.bytes_read, stats.bytes_written, now);

        TransferSnapshot {
            info_hash,
            name: self.handle.name(),
            total_size: total,
            downloaded: completed,
            uploaded: stats.bytes_written,
            download_rate,
            upload_rate,
            progress: completion_fraction(completed, total),
            status: infer_status(completed, total, self.paused, upload_rate),
            peers: stats.active_peers,
            created_at: self.created_at,
            magnet_uri: self.magnet.clone(),
        }
    }
}

/// Reader/writer locked session map.
///
/// Readers never re-enter the lock: take one guard and work from it.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<InfoHash, SessionEntry>>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access.
    pub async fn read(&self) -> RwLockReadGuard<'_, HashMap<InfoHash, SessionEntry>> {
        self.sessions.read().await
    }

    /// Exclusive access.
    pub async fn write(&self) -> RwLockWriteGuard<'_, HashMap<InfoHash, SessionEntry>> {
        self.sessions.write().await
    }

    /// Number of sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Whether `id` is present.
    pub async fn contains(&self, id: &InfoHash) -> bool {
        self.sessions.read().await.contains_key(id)
    }
}
