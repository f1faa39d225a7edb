//! Service configuration from the environment.
//!
//! | Variable                   | Default            |
//! |----------------------------|--------------------|
//! | `B2_PROXY_CHAIN`           | `127.0.0.1:9050`   |
//! | `B2_BIND`                  | `127.0.0.1:8080`   |
//! | `B2_DATA_DIR`              | `./downloads`      |
//! | `B2_DB_PATH`               | `<data>/b2torrent.db` |
//! | `B2_PROBE_ADDR`            | `1.1.1.1:80`       |
//! | `B2_DIAL_RETRIES`          | `3`                |
//! | `B2_METADATA_TIMEOUT_SECS` | `60`               |

use crate::error::{Error, Result};
use crate::proxy::{DialerConfig, ProxyChain, DEFAULT_SOCKS_PORT};
use crate::rate_limit::RateLimitConfig;
use crate::session::ManagerConfig;
use crate::storage::{DatabaseConfig, DEFAULT_DB_NAME};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Default download directory.
pub const DEFAULT_DATA_DIR: &str = "./downloads";

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub bind: String,
    /// Download directory handed to the engine.
    pub data_dir: PathBuf,
    /// Proxy hops in canonical order.
    pub proxy_chain: ProxyChain,
    /// Chain dialer settings.
    pub dialer: DialerConfig,
    /// Session manager settings.
    pub manager: ManagerConfig,
    /// Rate limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Database location.
    pub database: DatabaseConfig,
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let proxy_chain = match var("B2_PROXY_CHAIN") {
            Some(list) => ProxyChain::parse(&list)?,
            None => ProxyChain::new([format!("127.0.0.1:{}", DEFAULT_SOCKS_PORT)])?,
        };

        let data_dir = PathBuf::from(var("B2_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let db_path = var("B2_DB_PATH")
            .unwrap_or_else(|| data_dir.join(DEFAULT_DB_NAME).to_string_lossy().into_owned());

        let mut dialer = DialerConfig::default();
        if let Some(addr) = var("B2_PROBE_ADDR") {
            dialer.probe_addr = addr;
        }
        if let Some(retries) = parse_var::<u32>(&var, "B2_DIAL_RETRIES")? {
            if retries == 0 {
                return Err(Error::Config("B2_DIAL_RETRIES must be at least 1".into()));
            }
            dialer.max_attempts = retries;
        }

        let mut manager = ManagerConfig::default();
        if let Some(secs) = parse_var::<u64>(&var, "B2_METADATA_TIMEOUT_SECS")? {
            manager.metadata_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            bind: var("B2_BIND").unwrap_or_else(|| DEFAULT_BIND.into()),
            data_dir,
            proxy_chain,
            dialer,
            manager,
            rate_limit: RateLimitConfig::default(),
            database: DatabaseConfig {
                path: db_path,
                in_memory: false,
            },
        })
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{} is not a valid number", key)))
        })
        .transpose()
}
