//! Capability traits for the external torrent engine.
//!
//! Piece selection, peer wire protocol, trackers and metadata exchange all
//! live behind [`TorrentEngine`] and [`TorrentHandle`]. The session manager
//! never sees more of an engine than these methods.
//!
//! With the `rqbit` feature, [`RqbitEngine`] embeds librqbit. Without it the
//! build links [`UnlinkedEngine`], which rejects every add.

use crate::error::{Error, Result};
use crate::proxy::Dialer;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "rqbit")]
mod rqbit;

#[cfg(feature = "rqbit")]
pub use rqbit::{RqbitEngine, RqbitHandle};

/// Length of a v1 info-hash in bytes.
pub const INFO_HASH_LEN: usize = 20;

/// Content-derived transfer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for InfoHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; INFO_HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| Error::Validation("info-hash must be 40 hex characters".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "InfoHash({})", crate::logging::RedactedHash(&hex))
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Cumulative engine counters for one torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TorrentStats {
    /// Payload bytes read from peers.
    pub bytes_read: u64,
    /// Payload bytes written to peers.
    pub bytes_written: u64,
    /// Peers with an open connection.
    pub active_peers: u32,
}

/// One torrent inside the engine.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Resolves once the engine has the torrent's metadata.
    ///
    /// Never resolving is how an engine reports metadata it cannot find.
    async fn metadata_ready(&self) -> Result<()>;

    /// Content hash; meaningful once metadata is known.
    fn info_hash(&self) -> InfoHash;

    /// Display name from the metadata.
    fn name(&self) -> String;

    /// Total content length in bytes.
    fn length(&self) -> u64;

    /// Verified bytes on disk.
    fn bytes_completed(&self) -> u64;

    /// Live counters.
    fn stats(&self) -> TorrentStats;

    /// Request every piece.
    async fn download_all(&self) -> Result<()>;

    /// Cancel outstanding requests for every piece.
    async fn cancel_all_pieces(&self) -> Result<()>;

    /// Discard all engine-side state for this torrent.
    async fn drop_torrent(&self) -> Result<()>;
}

/// Entry point into the engine.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Start resolving a magnet descriptor.
    ///
    /// A torrent the engine already manages yields the handle it was first
    /// added with.
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn TorrentHandle>>;
}

/// Settings an engine is constructed with.
///
/// The defaults disable every discovery mechanism that would announce the
/// host's address outside the proxy chain.
#[derive(Clone)]
pub struct EngineConfig {
    /// Transport for every peer and tracker connection.
    pub transport: Arc<dyn Dialer>,
    /// Download directory.
    pub data_dir: PathBuf,
    /// Disable the mainline DHT.
    pub disable_dht: bool,
    /// Disable peer exchange.
    pub disable_pex: bool,
    /// Disable IPv6 peers.
    pub disable_ipv6: bool,
    /// Keep uploading after completion.
    pub seed: bool,
    /// Established connections per torrent.
    pub established_conns_per_torrent: usize,
    /// Half-open connections per torrent.
    pub half_open_conns_per_torrent: usize,
    /// Peer list size above which peers are pruned.
    pub peers_high_water: usize,
    /// Peer list size below which more peers are sought.
    pub peers_low_water: usize,
}

impl EngineConfig {
    /// Privacy-first configuration over `transport`.
    pub fn new(transport: Arc<dyn Dialer>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            data_dir: data_dir.into(),
            disable_dht: true,
            disable_pex: true,
            disable_ipv6: true,
            seed: false,
            established_conns_per_torrent: 50,
            half_open_conns_per_torrent: 25,
            peers_high_water: 100,
            peers_low_water: 50,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("data_dir", &self.data_dir)
            .field("disable_dht", &self.disable_dht)
            .field("disable_pex", &self.disable_pex)
            .field("disable_ipv6", &self.disable_ipv6)
            .field("seed", &self.seed)
            .field("established_conns_per_torrent", &self.established_conns_per_torrent)
            .field("half_open_conns_per_torrent", &self.half_open_conns_per_torrent)
            .finish_non_exhaustive()
    }
}

/// Engine used when the build carries no BitTorrent implementation.
///
/// Every add fails with [`Error::Engine`].
pub struct UnlinkedEngine {
    config: EngineConfig,
}

impl UnlinkedEngine {
    /// Accept a configuration it will never use for traffic.
    pub fn new(config: EngineConfig) -> Self {
        tracing::warn!("No torrent engine linked; adds will be rejected");
        Self { config }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait]
impl TorrentEngine for UnlinkedEngine {
    async fn add_magnet(&self, _magnet: &str) -> Result<Arc<dyn TorrentHandle>> {
        Err(Error::Engine("no torrent engine linked into this build".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::DirectDialer;

    #[test]
    fn test_info_hash_roundtrip() {
        let hex = "c9e15763f722f23e98a29decdfae341b98d53056";
        let hash: InfoHash = hex.parse().expect("parse");
        assert_eq!(hash.to_string(), hex);
        assert_eq!(hash.as_bytes()[0], 0xc9);
    }

    #[test]
    fn test_info_hash_rejects_bad_input() {
        assert!("xyz".parse::<InfoHash>().is_err());
        assert!("c9e15763".parse::<InfoHash>().is_err());
        assert!("zz".repeat(20).parse::<InfoHash>().is_err());
    }

    #[test]
    fn test_info_hash_debug_redacted() {
        let hash = InfoHash::from_bytes([0xab; INFO_HASH_LEN]);
        let shown = format!("{:?}", hash);
        assert!(!shown.contains(&hash.to_hex()));
    }

    #[test]
    fn test_engine_config_privacy_defaults() {
        let config = EngineConfig::new(Arc::new(DirectDialer), "/tmp/b2");
        assert!(config.disable_dht);
        assert!(config.disable_pex);
        assert!(!config.seed);
        assert_eq!(config.established_conns_per_torrent, 50);
        assert_eq!(config.peers_low_water, 50);
    }

    #[tokio::test]
    async fn test_unlinked_engine_rejects() {
        let engine = UnlinkedEngine::new(EngineConfig::new(Arc::new(DirectDialer), "/tmp/b2"));
        let result = engine.add_magnet("magnet:?xt=urn:btih:abc").await;
        assert!(matches!(result, Err(Error::Engine(_))));
    }
}
