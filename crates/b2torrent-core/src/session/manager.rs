//! Session lifecycle operations over the engine.

use super::store::{SessionEntry, SessionStore};
use super::TransferSnapshot;
use crate::engine::{InfoHash, TorrentEngine, TorrentHandle};
use crate::error::{Error, Result};
use crate::logging::{RedactedHash, RedactedMagnet};
use std::sync::Arc;
use std::time::Duration;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long an add waits for metadata.
    pub metadata_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(super::METADATA_TIMEOUT_SECS),
        }
    }
}

/// Drives the engine and owns every live transfer.
pub struct SessionManager {
    engine: Arc<dyn TorrentEngine>,
    store: SessionStore,
    config: ManagerConfig,
}

impl SessionManager {
    /// Manager over `engine` with an empty store.
    pub fn new(engine: Arc<dyn TorrentEngine>, config: ManagerConfig) -> Self {
        Self {
            engine,
            store: SessionStore::new(),
            config,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.store.is_empty().await
    }

    /// Add a transfer from a magnet descriptor and start fetching it.
    ///
    /// Waits up to the metadata timeout without holding the session lock.
    /// On timeout the engine-side torrent is dropped and nothing is stored.
    pub async fn add_transfer(&self, magnet: &str) -> Result<InfoHash> {
        let magnet = magnet.trim();
        if magnet.is_empty() {
            return Err(Error::Validation("magnet URI is required".into()));
        }

        let handle = self.engine.add_magnet(magnet).await?;

        match tokio::time::timeout(self.config.metadata_timeout, handle.metadata_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                release(handle.as_ref(), "metadata failure").await;
                return Err(e);
            }
            Err(_) => {
                release(handle.as_ref(), "metadata timeout").await;
                tracing::info!(magnet = %RedactedMagnet(magnet), "Metadata timeout");
                return Err(Error::MetadataTimeout);
            }
        }

        let info_hash = handle.info_hash();
        let hex = info_hash.to_hex();

        let mut sessions = self.store.write().await;
        if let Some(existing) = sessions.get(&info_hash) {
            // The stored handle keeps running.
            if !Arc::ptr_eq(existing.handle(), &handle) {
                release(handle.as_ref(), "duplicate add").await;
            }
            tracing::debug!(info_hash = %RedactedHash(&hex), "Transfer already managed");
            return Ok(info_hash);
        }

        if let Err(e) = handle.download_all().await {
            release(handle.as_ref(), "start failure").await;
            return Err(e);
        }

        sessions.insert(info_hash, SessionEntry::new(handle, magnet));
        tracing::info!(info_hash = %RedactedHash(&hex), "Transfer added");

        Ok(info_hash)
    }

    /// Current snapshot of one transfer.
    pub async fn get_transfer(&self, id: &InfoHash) -> Result<TransferSnapshot> {
        let sessions = self.store.read().await;
        sessions
            .get(id)
            .map(|entry| entry.snapshot(*id))
            .ok_or_else(|| not_found(id))
    }

    /// Snapshots of every transfer, newest first, from one read of the store.
    pub async fn list_transfers(&self) -> Vec<TransferSnapshot> {
        let sessions = self.store.read().await;
        let mut snapshots: Vec<TransferSnapshot> = sessions
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Discard engine state for `id`, then forget it.
    ///
    /// If the engine refuses, the session is kept.
    pub async fn remove_transfer(&self, id: &InfoHash) -> Result<()> {
        let mut sessions = self.store.write().await;
        let entry = sessions.get(id).ok_or_else(|| not_found(id))?;
        entry.handle().drop_torrent().await?;
        sessions.remove(id);

        tracing::info!(info_hash = %RedactedHash(&id.to_hex()), "Transfer removed");
        Ok(())
    }

    /// Cancel piece requests for `id`. The session stays in the store.
    pub async fn pause_transfer(&self, id: &InfoHash) -> Result<()> {
        let mut sessions = self.store.write().await;
        let entry = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.handle().cancel_all_pieces().await?;
        entry.set_paused(true);

        tracing::debug!(info_hash = %RedactedHash(&id.to_hex()), "Transfer paused");
        Ok(())
    }

    /// Re-request every piece for `id`.
    pub async fn resume_transfer(&self, id: &InfoHash) -> Result<()> {
        let mut sessions = self.store.write().await;
        let entry = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        entry.handle().download_all().await?;
        entry.set_paused(false);

        tracing::debug!(info_hash = %RedactedHash(&id.to_hex()), "Transfer resumed");
        Ok(())
    }

    /// Drop every session's engine state and empty the store.
    ///
    /// Engine failures are logged; the store is emptied regardless.
    /// Returns how many sessions were torn down.
    pub async fn shutdown(&self) -> usize {
        let mut sessions = self.store.write().await;
        let count = sessions.len();

        for (id, entry) in sessions.drain() {
            if let Err(e) = entry.handle().drop_torrent().await {
                tracing::error!(
                    info_hash = %RedactedHash(&id.to_hex()),
                    error = %e,
                    "Failed to drop torrent during shutdown"
                );
            }
        }

        tracing::info!(sessions = count, "All transfers cleared");
        count
    }
}

/// Drop a handle that never made it into the store.
async fn release(handle: &dyn TorrentHandle, reason: &'static str) {
    if let Err(e) = handle.drop_torrent().await {
        tracing::warn!(error = %e, reason, "Failed to drop unstored torrent");
    }
}

fn not_found(id: &InfoHash) -> Error {
    Error::NotFound(format!("no transfer {}", RedactedHash(&id.to_hex())))
}
