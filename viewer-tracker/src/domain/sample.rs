//! Viewer count samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation of a broadcast's concurrent viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub job_id: String,
    pub observed_at: DateTime<Utc>,
    pub concurrent_viewers: u64,
    pub is_live: bool,
}

impl Sample {
    pub fn new(
        job_id: impl Into<String>,
        observed_at: DateTime<Utc>,
        concurrent_viewers: u64,
        is_live: bool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            observed_at,
            concurrent_viewers,
            is_live,
        }
    }
}
