//! Multi-hop SOCKS5 transport.
//!
//! Provides the connection-establishing capability the torrent engine uses
//! for every peer and tracker socket.
//!
//! ## Design
//!
//! A [`Dialer`] establishes a byte stream to an address. [`Socks5Hop`] wraps
//! another dialer: it reaches its proxy through the wrapped dialer and then
//! asks that proxy to CONNECT onward. Folding the hop list over a
//! [`DirectDialer`] yields one composed dialer that traverses every hop.
//! There is no clearnet fallback.
//!
//! [`SocksIngress`] exposes any dialer as a loopback SOCKS5 server for
//! engines that only accept a proxy URL.

mod chain;
mod ingress;
mod probe;
pub mod socks;

pub use chain::{shuffle, DialerConfig, ProxyChain, ProxyChainDialer};
pub use ingress::SocksIngress;
pub use probe::{ChainHealth, ChainProber};
pub use socks::{split_host_port, Credentials, Socks5Hop};

use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Default SOCKS5 proxy port for Tor.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Dial attempts made by [`ProxyChainDialer::dial`].
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 3;

/// Linear backoff unit between dial attempts (seconds).
pub const DEFAULT_BACKOFF_SECS: u64 = 1;

/// Upper bound on a single composed dial attempt (seconds).
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;

/// External address each hop is asked to reach during a health check.
pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:80";

/// A bidirectional byte stream produced by a dialer.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ProxyStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn ProxyStream>;

/// The one capability both the chain and the engine depend on.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establish a connection to `addr` (`host:port`) over `network`.
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream>;
}

/// Only stream networks can be carried through SOCKS5 CONNECT.
pub(crate) fn check_network(network: &str) -> Result<()> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(()),
        other => Err(Error::Validation(format!("unsupported network: {}", other))),
    }
}

/// Plain TCP dial. Only ever used to reach the first hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        check_network(network)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
