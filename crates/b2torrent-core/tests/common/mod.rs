//! Shared fixtures: loopback SOCKS5 relays and a scripted torrent engine.

#![allow(dead_code)]

use async_trait::async_trait;
use b2torrent_core::engine::{InfoHash, TorrentEngine, TorrentHandle, TorrentStats};
use b2torrent_core::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ========================================
// SOCKS5 relay
// ========================================

/// A loopback SOCKS5 proxy that really connects onward.
pub struct Relay {
    pub addr: SocketAddr,
    /// CONNECT targets requested of this relay, in order.
    pub targets: Arc<Mutex<Vec<String>>>,
}

impl Relay {
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().expect("targets lock").clone()
    }
}

pub async fn spawn_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let targets = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&targets);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let _ = serve_socks(stream, recorded).await;
            });
        }
    });

    Relay { addr, targets }
}

async fn serve_socks(mut client: TcpStream, targets: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;

    if methods.contains(&0x02) {
        client.write_all(&[5, 0x02]).await?;
        let mut ver_len = [0u8; 2];
        client.read_exact(&mut ver_len).await?;
        let mut user = vec![0u8; ver_len[1] as usize];
        client.read_exact(&mut user).await?;
        let mut plen = [0u8; 1];
        client.read_exact(&mut plen).await?;
        let mut pass = vec![0u8; plen[0] as usize];
        client.read_exact(&mut pass).await?;
        client.write_all(&[1, 0]).await?;
    } else {
        client.write_all(&[5, 0x00]).await?;
    }

    let mut req = [0u8; 4];
    client.read_exact(&mut req).await?;
    let host = match req[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            client.read_exact(&mut ip).await?;
            Ipv4Addr::from(ip).to_string()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            client.read_exact(&mut ip).await?;
            Ipv6Addr::from(ip).to_string()
        }
        _ => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
    };
    let mut port = [0u8; 2];
    client.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    targets
        .lock()
        .expect("targets lock")
        .push(format!("{}:{}", host, port));

    match TcpStream::connect((host.as_str(), port)).await {
        Ok(mut upstream) => {
            client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        }
        Err(_) => {
            client.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        }
    }
    Ok(())
}

/// TCP echo server.
pub async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A loopback address with nothing listening.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

// ========================================
// Scripted engine
// ========================================

/// Marker in a magnet descriptor that makes metadata never arrive.
pub const STALL: &str = "stall";

/// Marker in a magnet descriptor that makes metadata resolution fail.
pub const BROKEN: &str = "broken";

pub struct FakeHandle {
    pub hash: InfoHash,
    pub resolves: bool,
    pub broken: bool,
    pub length: AtomicU64,
    pub completed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub download_all_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub fail_drop: AtomicBool,
    drops: Arc<AtomicUsize>,
}

impl FakeHandle {
    pub fn set_progress(&self, completed: u64, length: u64) {
        self.completed.store(completed, Ordering::SeqCst);
        self.length.store(length, Ordering::SeqCst);
    }
}

#[async_trait]
impl TorrentHandle for FakeHandle {
    async fn metadata_ready(&self) -> Result<()> {
        if !self.resolves {
            std::future::pending::<()>().await;
        }
        if self.broken {
            return Err(Error::Engine("metadata exchange failed".into()));
        }
        Ok(())
    }

    fn info_hash(&self) -> InfoHash {
        self.hash
    }

    fn name(&self) -> String {
        format!("fake-{}", &self.hash.to_hex()[..6])
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    fn bytes_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TorrentStats {
        TorrentStats {
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            bytes_written: self.bytes_written.load(Ordering::SeqCst),
            active_peers: 4,
        }
    }

    async fn download_all(&self) -> Result<()> {
        self.download_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_all_pieces(&self) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_torrent(&self) -> Result<()> {
        if self.fail_drop.load(Ordering::SeqCst) {
            return Err(Error::Engine("drop refused".into()));
        }
        self.drops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine whose torrents are derived from the magnet text.
#[derive(Default)]
pub struct FakeEngine {
    pub handles: Mutex<Vec<Arc<FakeHandle>>>,
    pub drops: Arc<AtomicUsize>,
    pub adds: AtomicUsize,
    pub fail_adds: AtomicBool,
    /// Hand back the stored handle when a hash is added again.
    pub reuse_handles: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    pub fn handle(&self, hash: &InfoHash) -> Arc<FakeHandle> {
        self.handles
            .lock()
            .expect("handles lock")
            .iter()
            .rev()
            .find(|h| h.hash == *hash)
            .cloned()
            .expect("handle exists")
    }
}

/// Magnet descriptor for a hash built from one repeated byte.
pub fn magnet(byte: u8) -> String {
    format!("magnet:?xt=urn:btih:{}", hash(byte).to_hex())
}

pub fn hash(byte: u8) -> InfoHash {
    InfoHash::from_bytes([byte; 20])
}

#[async_trait]
impl TorrentEngine for FakeEngine {
    async fn add_magnet(&self, magnet: &str) -> Result<Arc<dyn TorrentHandle>> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(Error::Engine("tracker unreachable".into()));
        }

        let hex = magnet.rsplit(':').next().unwrap_or_default();
        let hash = hex.parse().unwrap_or_else(|_| InfoHash::from_bytes([0xee; 20]));

        if self.reuse_handles.load(Ordering::SeqCst) {
            let handles = self.handles.lock().expect("handles lock");
            if let Some(existing) = handles.iter().find(|h| h.hash == hash) {
                let existing: Arc<dyn TorrentHandle> = existing.clone();
                return Ok(existing);
            }
        }

        let handle = Arc::new(FakeHandle {
            hash,
            resolves: !magnet.contains(STALL),
            broken: magnet.contains(BROKEN),
            length: AtomicU64::new(1_000),
            completed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            download_all_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            fail_drop: AtomicBool::new(false),
            drops: Arc::clone(&self.drops),
        });
        self.handles.lock().expect("handles lock").push(Arc::clone(&handle));
        Ok(handle)
    }
}
