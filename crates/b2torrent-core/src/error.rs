//! Error types for the B-2 torrent core.
//!
//! Display strings stay generic and never carry hop addresses, magnet
//! descriptors or info-hashes. The attached detail is for logs only.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Request input was rejected before reaching the engine.
    #[error("invalid request")]
    Validation(String),

    /// No transfer with the given identifier.
    #[error("transfer not found")]
    NotFound(String),

    /// The engine did not produce metadata within the bounded wait.
    #[error("timed out waiting for torrent metadata")]
    MetadataTimeout,

    /// A single hop failed its isolated reachability check.
    #[error("proxy hop {hop} unreachable")]
    ProxyUnreachable {
        /// Position of the hop in the canonical chain.
        hop: usize,
        /// Underlying cause.
        reason: String,
    },

    /// Every dial attempt through the chain failed.
    #[error("all {attempts} dial attempts failed")]
    Dial {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying cause.
        #[source]
        last: Box<Error>,
    },

    /// SOCKS5 negotiation with a hop failed.
    #[error("socks5 negotiation failed")]
    Socks(String),

    /// Network I/O failed outside a SOCKS5 exchange.
    #[error("network error")]
    Network(String),

    /// A cancellable operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The torrent engine reported a failure.
    #[error("engine error")]
    Engine(String),

    /// Storage operation failed.
    #[error("storage error")]
    Storage(String),

    /// Configuration could not be built.
    #[error("configuration error")]
    Config(String),
}

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the chain dialer may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::Cancelled | Error::Config(_)
        )
    }

    /// The innermost cause, unwrapping aggregate dial failures.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Dial { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Detail intended for the log, never for a response body.
    pub fn detail(&self) -> String {
        match self {
            Error::Validation(d)
            | Error::NotFound(d)
            | Error::Socks(d)
            | Error::Network(d)
            | Error::Engine(d)
            | Error::Storage(d)
            | Error::Config(d) => d.clone(),
            Error::ProxyUnreachable { hop, reason } => format!("hop {}: {}", hop, reason),
            Error::Dial { attempts, last } => {
                format!("after {} attempts: {}", attempts, last.detail())
            }
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
