//! # B-2 Torrent Core
//!
//! Transfer session management for a privacy-oriented torrent service.
//! Every outbound socket the torrent engine opens is routed through a
//! chain of SOCKS5 proxies whose hop order is reshuffled on each attempt.
//!
//! ## Privacy Model
//!
//! - No direct connections from the engine: the chain dialer is its only transport
//! - DHT and peer exchange disabled
//! - Rate limiting by route, never by client
//! - No transfer metadata survives a restart
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             HTTP boundary               │
//! ├─────────────────────────────────────────┤
//! │  session  │ rate_limit │   storage      │
//! ├─────────────────────────────────────────┤
//! │       engine (capability traits)        │
//! ├─────────────────────────────────────────┤
//! │        proxy (chain dialer, probe)      │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod rate_limit;
pub mod session;
pub mod storage;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
