//! B-2 Torrent server
//!
//! Serves the HTTP API with every outbound engine socket routed through
//! the configured SOCKS5 proxy chain.
//!
//! ## Privacy
//! - No transfer state survives the process: the mirror is cleared at
//!   startup and shutdown, and every session is torn down on exit
//! - Requests are never access-logged
//! - There is no clearnet fallback when the chain is down

use anyhow::Result;
use b2torrent_core::config::Config;
use b2torrent_core::engine::{EngineConfig, TorrentEngine};
use b2torrent_core::proxy::{ChainProber, ProxyChain, ProxyChainDialer};
use b2torrent_core::rate_limit::RateLimiter;
use b2torrent_core::session::SessionManager;
use b2torrent_core::storage::{Database, DEFAULT_DB_NAME};
use b2torrent_web::models::AppState;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// B-2 Torrent - torrent downloads through a chain of SOCKS5 proxies
#[derive(Parser)]
#[command(name = "b2torrent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// HTTP listen address (overrides B2_BIND)
    #[arg(short, long)]
    bind: Option<String>,

    /// Proxy hop as host:port; repeat for a longer chain (overrides B2_PROXY_CHAIN)
    #[arg(short, long = "proxy")]
    proxies: Vec<String>,

    /// Download directory (overrides B2_DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: Cli) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if !cli.proxies.is_empty() {
        config.proxy_chain = ProxyChain::new(cli.proxies)?;
    }
    if let Some(data_dir) = cli.data_dir {
        if std::env::var_os("B2_DB_PATH").is_none() {
            config.database.path = data_dir.join(DEFAULT_DB_NAME).to_string_lossy().into_owned();
        }
        config.data_dir = data_dir;
    }

    Ok(config)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(feature = "rqbit")]
async fn build_engine(config: EngineConfig) -> Result<Arc<dyn TorrentEngine>> {
    let engine = b2torrent_core::engine::RqbitEngine::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start torrent engine: {}", e.detail()))?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "rqbit"))]
async fn build_engine(config: EngineConfig) -> Result<Arc<dyn TorrentEngine>> {
    Ok(Arc::new(b2torrent_core::engine::UnlinkedEngine::new(config)))
}

/// Application entrypoint
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Starting B-2 Torrent server v{}", b2torrent_core::VERSION);

    let config = load_config(cli)?;

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        anyhow::bail!("Failed to create data directory: {}", e);
    }

    let database = Database::open(&config.database)
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    match database.clear_active_torrents() {
        Ok(rows) => info!(rows, "Cleared mirrored transfers from previous run"),
        Err(e) => error!(error = %e, "Failed to clear mirrored transfers"),
    }

    let dialer = Arc::new(ProxyChainDialer::new(config.proxy_chain.clone(), config.dialer.clone()));
    info!(hops = dialer.chain().len(), "Proxy chain configured");

    let engine = build_engine(EngineConfig::new(dialer.clone(), config.data_dir.clone())).await?;
    let manager = Arc::new(SessionManager::new(engine, config.manager.clone()));
    let prober = ChainProber::new(dialer);
    let route_check = b2torrent_web::spawn_route_check(prober.clone());

    let state = Arc::new(AppState {
        manager: Arc::clone(&manager),
        database: Arc::new(tokio::sync::Mutex::new(database)),
        prober,
        limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
    });
    let database = Arc::clone(&state.database);

    let app = b2torrent_web::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server running on http://{}", config.bind);
    if config.bind.starts_with("0.0.0.0") {
        warn!("Server accessible from network - bind to 127.0.0.1 for localhost only");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    route_check.abort();
    let cleared = manager.shutdown().await;
    if let Err(e) = database.lock().await.clear_active_torrents() {
        error!(error = %e, "Failed to clear mirrored transfers on shutdown");
    }
    info!(sessions = cleared, "Shutdown complete");

    served?;
    Ok(())
}
