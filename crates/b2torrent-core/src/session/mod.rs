//! Transfer sessions.
//!
//! The [`SessionStore`] maps info-hashes to live engine handles under a
//! reader/writer lock. The [`SessionManager`] drives the engine through it
//! and turns engine counters into [`TransferSnapshot`]s.
//!
//! ## Lifecycle
//!
//! ```text
//! starting ──► downloading ──► completed / seeding
//!     │            ▲   │
//!     └──► paused ─┘◄──┘
//! ```
//!
//! Completion is terminal apart from removal. Nothing outlives the process:
//! [`SessionManager::shutdown`] tears every session down.

mod manager;
mod store;

pub use manager::{ManagerConfig, SessionManager};
pub use store::{completion_fraction, infer_status, SessionEntry, SessionStore};

use crate::engine::InfoHash;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Wait for metadata before an add is abandoned (seconds).
pub const METADATA_TIMEOUT_SECS: u64 = 60;

/// Lifecycle status derived at each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Metadata known, no verified data yet.
    Starting,
    /// Fetching pieces.
    Downloading,
    /// Piece requests cancelled by the user.
    Paused,
    /// All content verified.
    Completed,
    /// Complete and uploading.
    Seeding,
}

impl TransferStatus {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Starting => "starting",
            TransferStatus::Downloading => "downloading",
            TransferStatus::Paused => "paused",
            TransferStatus::Completed => "completed",
            TransferStatus::Seeding => "seeding",
        }
    }

    /// Whether all content is present.
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Seeding)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    /// Transfer identifier.
    pub info_hash: InfoHash,
    /// Display name.
    pub name: String,
    /// Content length in bytes.
    pub total_size: u64,
    /// Verified bytes.
    pub downloaded: u64,
    /// Payload bytes sent to peers.
    pub uploaded: u64,
    /// Bytes per second received since the previous poll.
    pub download_rate: u64,
    /// Bytes per second sent since the previous poll.
    pub upload_rate: u64,
    /// Completion percentage in `[0, 100]`.
    pub progress: f64,
    /// Derived lifecycle status.
    pub status: TransferStatus,
    /// Connected peers.
    pub peers: u32,
    /// When the session was added.
    pub created_at: DateTime<Utc>,
    /// Originating descriptor. Mirrored to storage, never serialized.
    #[serde(skip_serializing)]
    pub magnet_uri: String,
}
