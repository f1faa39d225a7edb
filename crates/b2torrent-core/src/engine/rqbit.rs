//! [`TorrentEngine`] backed by an embedded librqbit session.
//!
//! librqbit takes a single SOCKS5 proxy URL. The engine binds a
//! [`SocksIngress`] over [`EngineConfig::transport`] and hands librqbit that
//! loopback URL, so peer and tracker streams traverse the whole chain.
//! Session persistence, fast-resume and DHT persistence stay off.

use super::{EngineConfig, InfoHash, TorrentEngine, TorrentHandle, TorrentStats};
use crate::error::{Error, Result};
use crate::logging::RedactedHash;
use crate::proxy::SocksIngress;
use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrentHandle, Session,
    SessionOptions,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

fn engine_error(context: &str, e: impl fmt::Display) -> Error {
    Error::Engine(format!("{}: {:#}", context, e))
}

/// Embedded librqbit engine.
pub struct RqbitEngine {
    session: Arc<Session>,
    handles: Arc<Mutex<HashMap<InfoHash, Arc<RqbitHandle>>>>,
    config: EngineConfig,
    // Held for the engine's lifetime; dropping it closes the proxy endpoint.
    _ingress: SocksIngress,
}

impl RqbitEngine {
    /// Start a session whose every connection goes through `config.transport`.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let ingress = SocksIngress::bind(Arc::clone(&config.transport)).await?;

        let mut options = SessionOptions::default();
        options.disable_dht = config.disable_dht;
        options.disable_dht_persistence = true;
        options.persistence = None;
        options.fastresume = false;
        options.socks_proxy_url = Some(ingress.proxy_url());

        let session = Session::new_with_opts(config.data_dir.clone(), options)
            .await
            .map_err(|e| engine_error("failed to start librqbit session", e))?;

        tracing::info!(
            dht = !config.disable_dht,
            "librqbit session started behind the proxy chain"
        );

        Ok(Self {
            session,
            handles: Arc::new(Mutex::new(HashMap::new())),
            config,
            _ingress: ingress,
        })
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lookup(&self, id: &InfoHash) -> Option<Arc<RqbitHandle>> {
        self.handles.lock().ok()?.get(id).cloned()
    }
}

#[async_trait]
impl TorrentEngine for RqbitEngine {
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn TorrentHandle>> {
        let options = AddTorrentOptions {
            overwrite: true,
            output_folder: Some(self.config.data_dir.display().to_string()),
            ..Default::default()
        };

        let response = self
            .session
            .add_torrent(AddTorrent::from_url(magnet.to_string()), Some(options))
            .await
            .map_err(|e| engine_error("add failed", e))?;

        let (id, torrent) = match response {
            AddTorrentResponse::Added(id, torrent)
            | AddTorrentResponse::AlreadyManaged(id, torrent) => (id, torrent),
            AddTorrentResponse::ListOnly(_) => {
                return Err(Error::Engine("add returned a list-only response".into()));
            }
        };

        let info_hash = InfoHash::from_bytes(torrent.info_hash().0);
        if let Some(existing) = self.lookup(&info_hash) {
            return Ok(existing);
        }

        let handle = Arc::new(RqbitHandle {
            id,
            info_hash,
            torrent,
            session: Arc::clone(&self.session),
            registry: Arc::downgrade(&self.handles),
            paused: AtomicBool::new(false),
        });

        let mut handles = self
            .handles
            .lock()
            .map_err(|_| Error::Engine("handle registry poisoned".into()))?;
        let handle = handles.entry(info_hash).or_insert(handle).clone();
        Ok(handle)
    }
}

type TorrentId = usize;

/// One torrent inside an [`RqbitEngine`] session.
pub struct RqbitHandle {
    id: TorrentId,
    info_hash: InfoHash,
    torrent: ManagedTorrentHandle,
    session: Arc<Session>,
    registry: Weak<Mutex<HashMap<InfoHash, Arc<RqbitHandle>>>>,
    paused: AtomicBool,
}

#[async_trait]
impl TorrentHandle for RqbitHandle {
    async fn metadata_ready(&self) -> Result<()> {
        self.torrent
            .wait_until_initialized()
            .await
            .map_err(|e| engine_error("torrent initialization failed", e))
    }

    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> String {
        self.torrent.name().unwrap_or_default()
    }

    fn length(&self) -> u64 {
        self.torrent.stats().total_bytes
    }

    fn bytes_completed(&self) -> u64 {
        self.torrent.stats().progress_bytes
    }

    fn stats(&self) -> TorrentStats {
        let stats = self.torrent.stats();
        let (bytes_read, active_peers) = stats
            .live
            .as_ref()
            .map(|live| {
                let peers = u32::try_from(live.snapshot.peer_stats.live).unwrap_or(u32::MAX);
                (live.snapshot.fetched_bytes, peers)
            })
            .unwrap_or((0, 0));
        TorrentStats {
            bytes_read,
            bytes_written: stats.uploaded_bytes,
            active_peers,
        }
    }

    async fn download_all(&self) -> Result<()> {
        // Torrents start live; only a previous pause needs undoing.
        if self.paused.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.session.unpause(&self.torrent).await {
                self.paused.store(true, Ordering::SeqCst);
                return Err(engine_error("unpause failed", e));
            }
        }
        Ok(())
    }

    async fn cancel_all_pieces(&self) -> Result<()> {
        if !self.paused.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.session.pause(&self.torrent).await {
                self.paused.store(false, Ordering::SeqCst);
                return Err(engine_error("pause failed", e));
            }
        }
        Ok(())
    }

    async fn drop_torrent(&self) -> Result<()> {
        self.session
            .delete(TorrentIdOrHash::Id(self.id), false)
            .await
            .map_err(|e| engine_error("delete failed", e))?;

        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut handles) = registry.lock() {
                handles.remove(&self.info_hash);
            }
        }
        tracing::debug!(info_hash = %RedactedHash(&self.info_hash.to_hex()), "Engine torrent deleted");
        Ok(())
    }
}
