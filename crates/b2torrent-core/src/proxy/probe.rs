//! Proxy chain connectivity checks.
//!
//! Two distinct checks exist and they are not interchangeable:
//!
//! - [`ChainProber::test_proxy_chain`] asks each hop, in isolation and over
//!   a direct connection, to reach the probe address. This is what the
//!   health endpoint reports.
//! - [`ChainProber::test_composed_route`] dials the probe address once
//!   through the full composed chain.
//!
//! A chain can pass the first and still fail the second: hops that work
//! alone may not accept connections from one another, and ordering is
//! random per attempt.

use super::{Dialer, ProxyChainDialer, Socks5Hop};
use crate::error::{Error, Result};
use crate::logging::RedactedHop;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Per-hop health summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainHealth {
    /// Number of hops in the chain.
    pub hops: usize,
    /// Whether every hop reached the probe address.
    pub healthy: bool,
    /// Index of the first hop that failed, if any.
    pub failed_hop: Option<usize>,
}

/// Runs connectivity checks against a chain dialer's hops.
#[derive(Clone)]
pub struct ChainProber {
    dialer: Arc<ProxyChainDialer>,
}

impl ChainProber {
    /// Prober for the hops of `dialer`.
    pub fn new(dialer: Arc<ProxyChainDialer>) -> Self {
        Self { dialer }
    }

    /// Check each hop independently; fail on the first unreachable one.
    ///
    /// This does not exercise the composed multi-hop route.
    pub async fn test_proxy_chain(&self) -> Result<()> {
        let config = self.dialer.config();

        for (index, hop) in self.dialer.chain().hops().iter().enumerate() {
            let probe = Socks5Hop::new(hop.clone(), self.dialer.base(), None);

            let result = tokio::time::timeout(config.attempt_timeout, async {
                let mut stream = probe.dial("tcp", &config.probe_addr).await?;
                let _ = stream.shutdown().await;
                Ok::<(), Error>(())
            })
            .await
            .unwrap_or(Err(Error::Timeout));

            if let Err(e) = result {
                tracing::warn!(hop = index, proxy = %RedactedHop(hop), error = %e, "Proxy hop unreachable");
                return Err(Error::ProxyUnreachable {
                    hop: index,
                    reason: e.detail(),
                });
            }
        }

        Ok(())
    }

    /// Dial the probe address once through the full composed chain.
    pub async fn test_composed_route(&self) -> Result<()> {
        let mut stream = self
            .dialer
            .dial_with_retry("tcp", &self.dialer.config().probe_addr, 1)
            .await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Summarise [`test_proxy_chain`](Self::test_proxy_chain).
    pub async fn health(&self) -> ChainHealth {
        let hops = self.dialer.chain().len();
        match self.test_proxy_chain().await {
            Ok(()) => ChainHealth {
                hops,
                healthy: true,
                failed_hop: None,
            },
            Err(Error::ProxyUnreachable { hop, .. }) => ChainHealth {
                hops,
                healthy: false,
                failed_hop: Some(hop),
            },
            Err(_) => ChainHealth {
                hops,
                healthy: false,
                failed_hop: None,
            },
        }
    }
}
