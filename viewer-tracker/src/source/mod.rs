//! Broadcast metadata sources.
//!
//! A source answers two questions about a broadcast: a cheap "is it live?"
//! probe and a full snapshot including the concurrent viewer count.

mod ytdlp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BroadcastRef;

pub use ytdlp::{YtDlpConfig, YtDlpSource};

/// Coarse liveness reported by [`MetadataSource::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Live,
    /// Scheduled but not started yet.
    Upcoming,
    NotLive,
    /// The broadcast is over.
    Ended,
}

/// Point-in-time view of a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub is_live: bool,
    /// Raw count as reported upstream. `None` when the source omitted it.
    pub concurrent_viewers: Option<i64>,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

/// Errors a source may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network hiccup, rate limit, timeout. Retry later.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("broadcast not found: {0}")]
    NotFound(String),
    /// The broadcast is gone for good.
    #[error("broadcast permanently ended: {0}")]
    PermanentEnd(String),
}

impl From<FetchError> for crate::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient(msg) => Self::TransientFetch(msg),
            FetchError::NotFound(msg) => Self::not_found("broadcast", msg),
            FetchError::PermanentEnd(msg) => Self::PermanentEnd(msg),
        }
    }
}

/// A provider of broadcast metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    /// Cheap liveness check.
    async fn probe(&self, broadcast: &BroadcastRef) -> Result<LiveStatus, FetchError>;

    /// Full snapshot including the viewer count.
    async fn fetch(&self, broadcast: &BroadcastRef) -> Result<Snapshot, FetchError>;
}
