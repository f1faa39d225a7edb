//! Proxy chain composition with per-attempt hop shuffling and retry.

use super::socks::{split_host_port, Credentials, Socks5Hop};
use super::{BoxedStream, Dialer, DirectDialer};
use crate::error::{Error, Result};
use crate::logging::RedactedHop;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for the chain dialer.
#[derive(Debug, Clone)]
pub struct DialerConfig {
    /// Attempts made by [`ProxyChainDialer::dial`].
    pub max_attempts: u32,
    /// Attempt `n` failing sleeps `n * backoff_base` before the next one.
    pub backoff_base: Duration,
    /// Bound on a single composed attempt.
    pub attempt_timeout: Duration,
    /// Address each hop must reach during a health check.
    pub probe_addr: String,
    /// Use fresh random SOCKS credentials per attempt (circuit isolation).
    pub isolate_streams: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            max_attempts: super::DEFAULT_DIAL_ATTEMPTS,
            backoff_base: Duration::from_secs(super::DEFAULT_BACKOFF_SECS),
            attempt_timeout: Duration::from_secs(super::DEFAULT_ATTEMPT_TIMEOUT_SECS),
            probe_addr: super::DEFAULT_PROBE_ADDR.to_string(),
            isolate_streams: true,
        }
    }
}

/// Ordered, non-empty list of proxy endpoints. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProxyChain {
    hops: Arc<[String]>,
}

impl ProxyChain {
    /// Build a chain from `host:port` endpoints.
    pub fn new<I, S>(hops: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hops: Vec<String> = hops.into_iter().map(Into::into).collect();
        if hops.is_empty() {
            return Err(Error::Config("at least one proxy address required".into()));
        }
        for hop in &hops {
            split_host_port(hop)
                .map_err(|_| Error::Config(format!("invalid proxy address {}", RedactedHop(hop))))?;
        }
        Ok(Self { hops: hops.into() })
    }

    /// Parse a comma separated list, ignoring blanks.
    pub fn parse(list: &str) -> Result<Self> {
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    /// Hops in canonical order.
    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    /// Number of hops (always at least one).
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the chain has no hops. Never true for a built chain.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// A freshly shuffled copy of the hops. The chain itself is untouched.
    pub fn permuted(&self) -> Vec<String> {
        let mut route = self.hops.to_vec();
        shuffle(&mut route);
        route
    }
}

/// Fisher–Yates shuffle drawing from the operating system RNG.
///
/// A predictable hop order could be fingerprinted from outside.
pub fn shuffle<T>(items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = OsRng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Dialer that routes every connection through all hops of a [`ProxyChain`].
pub struct ProxyChainDialer {
    chain: ProxyChain,
    base: Arc<dyn Dialer>,
    config: DialerConfig,
}

impl ProxyChainDialer {
    /// Chain dialer whose first hop is reached by plain TCP.
    pub fn new(chain: ProxyChain, config: DialerConfig) -> Self {
        Self::with_base(chain, config, Arc::new(DirectDialer))
    }

    /// Chain dialer over a custom base transport.
    pub fn with_base(chain: ProxyChain, config: DialerConfig, base: Arc<dyn Dialer>) -> Self {
        Self {
            chain,
            base,
            config,
        }
    }

    /// The canonical chain.
    pub fn chain(&self) -> &ProxyChain {
        &self.chain
    }

    /// Dialer configuration.
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    pub(crate) fn base(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.base)
    }

    /// Fold the route into one dialer: the first hop wraps the base dial and
    /// each later hop wraps everything composed before it.
    fn compose(&self, route: &[String], auth: Option<&Credentials>) -> Arc<dyn Dialer> {
        route.iter().fold(self.base(), |inner, hop| {
            Arc::new(Socks5Hop::new(hop.clone(), inner, auth.cloned())) as Arc<dyn Dialer>
        })
    }

    /// Dial with the configured attempt budget.
    pub async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        self.dial_with_retry(network, addr, self.config.max_attempts).await
    }

    /// Dial through a freshly shuffled route on each of up to `max_attempts`
    /// attempts, backing off linearly between them.
    pub async fn dial_with_retry(
        &self,
        network: &str,
        addr: &str,
        max_attempts: u32,
    ) -> Result<BoxedStream> {
        if max_attempts == 0 {
            return Err(Error::Validation("max_attempts must be at least 1".into()));
        }
        super::check_network(network)?;

        let mut last_err = None;

        for attempt in 1..=max_attempts {
            let route = self.chain.permuted();
            let auth = self.config.isolate_streams.then(Credentials::random);
            let composed = self.compose(&route, auth.as_ref());

            let result = tokio::time::timeout(self.config.attempt_timeout, composed.dial(network, addr))
                .await
                .unwrap_or(Err(Error::Timeout));

            match result {
                Ok(stream) => {
                    tracing::debug!(attempt, hops = route.len(), "Route established");
                    return Ok(stream);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "Dial attempt failed");
                    last_err = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff_base * attempt).await;
                    }
                }
            }
        }

        Err(Error::Dial {
            attempts: max_attempts,
            last: Box::new(last_err.unwrap_or(Error::Timeout)),
        })
    }

    /// [`dial`](Self::dial) raced against `cancel`.
    ///
    /// Losing the race drops the in-flight attempt, which closes any sockets
    /// it had opened; nothing keeps running in the background.
    pub async fn dial_cancellable(
        &self,
        cancel: &CancellationToken,
        network: &str,
        addr: &str,
    ) -> Result<BoxedStream> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.dial(network, addr) => result,
        }
    }
}

#[async_trait]
impl Dialer for ProxyChainDialer {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        self.dial_with_retry(network, addr, self.config.max_attempts).await
    }
}
