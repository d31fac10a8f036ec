//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::domain::JobState;

/// Largest page accepted by list endpoints.
pub const MAX_LIST_LIMIT: u32 = 100;

/// `POST /api/jobs` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub broadcast_ref: String,
    /// Email address or webhook URL.
    pub notify_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub id: String,
    pub state: JobState,
}

/// Query parameters for `GET /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

impl ListJobsQuery {
    /// Requested limit, clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_jobs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
}
