//! Integration tests for the multi-hop dialer and the chain prober.
//!
//! Relays are real SOCKS5 servers on loopback that connect onward, so a
//! successful dial proves every hop was traversed. The loopback ingress is
//! exercised the same way, from a plain SOCKS5 client.

mod common;

use async_trait::async_trait;
use b2torrent_core::proxy::{
    socks, BoxedStream, ChainProber, Dialer, DialerConfig, DirectDialer, ProxyChain,
    ProxyChainDialer, SocksIngress,
};
use b2torrent_core::Error;
use common::{dead_addr, spawn_echo, spawn_relay};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

fn fast_config() -> DialerConfig {
    DialerConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(5),
        ..DialerConfig::default()
    }
}

async fn assert_echo(mut stream: BoxedStream) {
    stream.write_all(b"ping").await.expect("write");
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.expect("read");
    assert_eq!(&buf, b"ping");
}

/// Base transport that always fails and counts attempts.
#[derive(Default)]
struct FailingDialer {
    calls: AtomicU32,
}

#[async_trait]
impl Dialer for FailingDialer {
    async fn dial(&self, _network: &str, _addr: &str) -> b2torrent_core::Result<BoxedStream> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(Error::Network(format!("refused #{}", n)))
    }
}

/// Base transport that records which hop it was asked to reach.
struct RecordingDialer {
    first_hops: Mutex<Vec<String>>,
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn dial(&self, network: &str, addr: &str) -> b2torrent_core::Result<BoxedStream> {
        self.first_hops.lock().expect("lock").push(addr.to_string());
        DirectDialer.dial(network, addr).await
    }
}

/// Base transport that never completes; flags when its future is dropped.
struct HangingDialer {
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dialer for HangingDialer {
    async fn dial(&self, _network: &str, _addr: &str) -> b2torrent_core::Result<BoxedStream> {
        let _flag = DropFlag(Arc::clone(&self.dropped));
        std::future::pending::<()>().await;
        Err(Error::Timeout)
    }
}

#[tokio::test]
async fn test_two_hop_route_reaches_destination() {
    let echo = spawn_echo().await;
    let a = spawn_relay().await;
    let b = spawn_relay().await;

    let chain = ProxyChain::new([a.addr.to_string(), b.addr.to_string()]).expect("chain");
    let dialer = ProxyChainDialer::new(chain, fast_config());

    let stream = dialer.dial("tcp", &echo.to_string()).await.expect("dial");
    assert_echo(stream).await;

    // Exactly one relay was asked for the destination, the other for the relay.
    let mut all: Vec<String> = a.targets();
    all.extend(b.targets());
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|t| **t == echo.to_string()).count(), 1);
    assert!(all.contains(&a.addr.to_string()) || all.contains(&b.addr.to_string()));
}

#[tokio::test]
async fn test_three_hop_route_traverses_every_hop() {
    let echo = spawn_echo().await;
    let relays = vec![spawn_relay().await, spawn_relay().await, spawn_relay().await];

    let chain = ProxyChain::new(relays.iter().map(|r| r.addr.to_string())).expect("chain");
    let dialer = ProxyChainDialer::new(chain, fast_config());

    let stream = dialer.dial("tcp", &echo.to_string()).await.expect("dial");
    assert_echo(stream).await;

    let targets: Vec<String> = relays.iter().flat_map(|r| r.targets()).collect();
    assert_eq!(targets.len(), 3);
    // Every relay but the entry hop was reached through another relay.
    let relay_targets: HashSet<&String> = targets.iter().filter(|t| **t != echo.to_string()).collect();
    assert_eq!(relay_targets.len(), 2);
    for relay in &relays {
        assert_eq!(relay.targets().len(), 1, "each hop negotiates exactly once");
    }
}

#[tokio::test]
async fn test_route_without_isolation() {
    let echo = spawn_echo().await;
    let relay = spawn_relay().await;

    let config = DialerConfig {
        isolate_streams: false,
        ..fast_config()
    };
    let chain = ProxyChain::new([relay.addr.to_string()]).expect("chain");
    let dialer = ProxyChainDialer::new(chain, config);

    let stream = dialer.dial("tcp", &echo.to_string()).await.expect("dial");
    assert_echo(stream).await;
}

#[tokio::test]
async fn test_always_failing_transport_makes_exactly_k_attempts() {
    let base = Arc::new(FailingDialer::default());
    let chain = ProxyChain::new(["10.0.0.1:9050", "10.0.0.2:9050"]).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, fast_config(), base.clone());

    let err = dialer
        .dial_with_retry("tcp", "1.1.1.1:80", 4)
        .await
        .err()
        .expect("dial must fail");

    assert_eq!(base.calls.load(Ordering::SeqCst), 4);
    match err {
        Error::Dial { attempts, ref last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(**last, Error::Network(ref d) if d == "refused #4"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_default_dial_uses_configured_attempts() {
    let base = Arc::new(FailingDialer::default());
    let chain = ProxyChain::new(["10.0.0.1:9050"]).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, fast_config(), base.clone());

    assert!(dialer.dial("tcp", "1.1.1.1:80").await.is_err());
    assert_eq!(base.calls.load(Ordering::SeqCst), 3);
}

/// Base transport that fails and records when each attempt started.
#[derive(Default)]
struct TimedFailingDialer {
    started: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Dialer for TimedFailingDialer {
    async fn dial(&self, _network: &str, _addr: &str) -> b2torrent_core::Result<BoxedStream> {
        self.started.lock().expect("lock").push(tokio::time::Instant::now());
        Err(Error::Network("refused".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_linearly_between_attempts() {
    let base = Arc::new(TimedFailingDialer::default());
    let config = DialerConfig {
        backoff_base: Duration::from_secs(1),
        ..fast_config()
    };
    let chain = ProxyChain::new(["10.0.0.1:9050"]).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, config, base.clone());

    let start = tokio::time::Instant::now();
    assert!(dialer.dial_with_retry("tcp", "1.1.1.1:80", 4).await.is_err());
    let elapsed = start.elapsed();

    // 1s + 2s + 3s, and no sleep after the final attempt.
    assert!(elapsed >= Duration::from_secs(6), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(7), "elapsed {:?}", elapsed);

    let started = base.started.lock().expect("lock").clone();
    assert_eq!(started.len(), 4);
    let gaps: Vec<u64> = started.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
    assert_eq!(gaps, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_entry_hop_is_always_a_chain_member() {
    let echo = spawn_echo().await;
    let relays = vec![spawn_relay().await, spawn_relay().await];
    let hops: Vec<String> = relays.iter().map(|r| r.addr.to_string()).collect();

    let base = Arc::new(RecordingDialer {
        first_hops: Mutex::new(Vec::new()),
    });
    let chain = ProxyChain::new(hops.clone()).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, fast_config(), base.clone());

    for _ in 0..6 {
        let stream = dialer.dial("tcp", &echo.to_string()).await.expect("dial");
        assert_echo(stream).await;
    }

    let first_hops = base.first_hops.lock().expect("lock").clone();
    assert_eq!(first_hops.len(), 6);
    assert!(first_hops.iter().all(|h| hops.contains(h)));
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failure() {
    let base = Arc::new(HangingDialer {
        dropped: Arc::new(AtomicBool::new(false)),
    });
    let config = DialerConfig {
        attempt_timeout: Duration::from_millis(20),
        ..fast_config()
    };
    let chain = ProxyChain::new(["10.0.0.1:9050"]).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, config, base);

    let err = dialer.dial_with_retry("tcp", "1.1.1.1:80", 2).await.err().expect("fails");
    assert!(matches!(err, Error::Dial { attempts: 2, .. }));
    assert!(matches!(err.root_cause(), Error::Timeout));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_attempt() {
    let dropped = Arc::new(AtomicBool::new(false));
    let base = Arc::new(HangingDialer {
        dropped: Arc::clone(&dropped),
    });
    let config = DialerConfig {
        attempt_timeout: Duration::from_secs(3600),
        ..fast_config()
    };
    let chain = ProxyChain::new(["10.0.0.1:9050"]).expect("chain");
    let dialer = ProxyChainDialer::with_base(chain, config, base);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = dialer.dial_cancellable(&token, "tcp", "1.1.1.1:80").await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(dropped.load(Ordering::SeqCst), "attempt must not keep running");
}

#[tokio::test]
async fn test_already_cancelled_token() {
    let echo = spawn_echo().await;
    let relay = spawn_relay().await;
    let chain = ProxyChain::new([relay.addr.to_string()]).expect("chain");
    let dialer = ProxyChainDialer::new(chain, fast_config());

    let token = CancellationToken::new();
    token.cancel();
    let result = dialer.dial_cancellable(&token, "tcp", &echo.to_string()).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(relay.targets().is_empty());
}

#[tokio::test]
async fn test_chain_dialer_as_dyn_transport() {
    let echo = spawn_echo().await;
    let relay = spawn_relay().await;
    let chain = ProxyChain::new([relay.addr.to_string()]).expect("chain");
    let transport: Arc<dyn Dialer> = Arc::new(ProxyChainDialer::new(chain, fast_config()));

    let stream = transport.dial("tcp", &echo.to_string()).await.expect("dial");
    assert_echo(stream).await;
}

// ========================================
// Prober
// ========================================

#[tokio::test]
async fn test_healthy_chain_passes_both_checks() {
    let probe = spawn_echo().await;
    let a = spawn_relay().await;
    let b = spawn_relay().await;

    let config = DialerConfig {
        probe_addr: probe.to_string(),
        ..fast_config()
    };
    let chain = ProxyChain::new([a.addr.to_string(), b.addr.to_string()]).expect("chain");
    let prober = ChainProber::new(Arc::new(ProxyChainDialer::new(chain, config)));

    prober.test_proxy_chain().await.expect("per-hop check");
    // Each hop was asked for the probe address directly, not for another hop.
    assert_eq!(a.targets(), vec![probe.to_string()]);
    assert_eq!(b.targets(), vec![probe.to_string()]);

    prober.test_composed_route().await.expect("composed check");
    assert!(prober.health().await.healthy);
}

#[tokio::test]
async fn test_unreachable_hop_reported_by_index() {
    let probe = spawn_echo().await;
    let good = spawn_relay().await;
    let dead = dead_addr().await;

    let config = DialerConfig {
        probe_addr: probe.to_string(),
        ..fast_config()
    };
    let chain = ProxyChain::new([good.addr.to_string(), dead.to_string()]).expect("chain");
    let prober = ChainProber::new(Arc::new(ProxyChainDialer::new(chain, config)));

    let err = prober.test_proxy_chain().await.err().expect("must fail");
    assert!(matches!(err, Error::ProxyUnreachable { hop: 1, .. }));

    let health = prober.health().await;
    assert!(!health.healthy);
    assert_eq!(health.failed_hop, Some(1));
    assert_eq!(health.hops, 2);
}

#[tokio::test]
async fn test_hop_that_cannot_reach_probe_fails() {
    let relay = spawn_relay().await;
    let config = DialerConfig {
        probe_addr: dead_addr().await.to_string(),
        ..fast_config()
    };
    let chain = ProxyChain::new([relay.addr.to_string()]).expect("chain");
    let prober = ChainProber::new(Arc::new(ProxyChainDialer::new(chain, config)));

    let err = prober.test_proxy_chain().await.err().expect("must fail");
    match err {
        Error::ProxyUnreachable { hop, reason } => {
            assert_eq!(hop, 0);
            assert!(reason.contains("connection refused"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// ========================================
// Loopback ingress
// ========================================

async fn connect_ingress(ingress: &SocksIngress, target: &str) -> b2torrent_core::Result<TcpStream> {
    let mut stream = TcpStream::connect(ingress.local_addr()).await?;
    socks::connect(&mut stream, target, None).await?;
    Ok(stream)
}

#[tokio::test]
async fn test_ingress_relays_through_every_hop() {
    let echo = spawn_echo().await;
    let a = spawn_relay().await;
    let b = spawn_relay().await;
    let chain = ProxyChain::new([a.addr.to_string(), b.addr.to_string()]).expect("chain");
    let dialer: Arc<dyn Dialer> = Arc::new(ProxyChainDialer::new(chain, fast_config()));

    let ingress = SocksIngress::bind(dialer).await.expect("bind");
    assert!(ingress.local_addr().ip().is_loopback());
    assert_eq!(ingress.proxy_url(), format!("socks5://{}", ingress.local_addr()));

    let stream = connect_ingress(&ingress, &echo.to_string()).await.expect("connect");
    assert_echo(Box::new(stream)).await;

    // One relay was entered directly, the other was asked for the echo server.
    let mut seen = a.targets();
    seen.extend(b.targets());
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&echo.to_string()));
}

/// Base transport that records each requested target and reaches none.
#[derive(Default)]
struct TargetLog {
    targets: Mutex<Vec<String>>,
}

#[async_trait]
impl Dialer for TargetLog {
    async fn dial(&self, _network: &str, addr: &str) -> b2torrent_core::Result<BoxedStream> {
        self.targets.lock().expect("lock").push(addr.to_string());
        Err(Error::Network("unreachable".into()))
    }
}

#[tokio::test]
async fn test_ingress_passes_names_unresolved() {
    let base = Arc::new(TargetLog::default());
    let ingress = SocksIngress::bind(base.clone()).await.expect("bind");

    let result = connect_ingress(&ingress, "peer.invalid:6881").await;
    assert!(matches!(result, Err(Error::Socks(_))));
    assert_eq!(
        base.targets.lock().expect("lock").clone(),
        vec!["peer.invalid:6881".to_string()]
    );
}

#[tokio::test]
async fn test_ingress_reports_chain_failure() {
    let base = Arc::new(FailingDialer::default());
    let chain = ProxyChain::new(["10.0.0.1:9050"]).expect("chain");
    let dialer: Arc<dyn Dialer> = Arc::new(ProxyChainDialer::with_base(chain, fast_config(), base.clone()));
    let ingress = SocksIngress::bind(dialer).await.expect("bind");

    let err = connect_ingress(&ingress, "1.1.1.1:80").await.err().expect("must fail");
    match err {
        Error::Socks(detail) => assert!(detail.contains("general failure")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(base.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dropped_ingress_stops_listening() {
    let ingress = SocksIngress::bind(Arc::new(DirectDialer)).await.expect("bind");
    let addr = ingress.local_addr();
    drop(ingress);

    let mut refused = false;
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refused);
}
