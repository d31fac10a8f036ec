//! Viewer sample database model.

use serde::Serialize;
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::Sample;

/// Row of the `viewer_samples` table.
#[derive(Debug, Clone, FromRow)]
pub struct SampleDbModel {
    pub id: i64,
    pub job_id: String,
    pub observed_at: i64,
    pub concurrent_viewers: i64,
    pub is_live: bool,
}

impl From<SampleDbModel> for Sample {
    fn from(row: SampleDbModel) -> Self {
        Sample::new(
            row.job_id,
            ms_to_datetime(row.observed_at),
            row.concurrent_viewers.max(0) as u64,
            row.is_live,
        )
    }
}

/// Aggregates over a job's samples, used by the status view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleStats {
    pub sample_count: u64,
    /// Most recent viewer count.
    pub current_viewers: Option<u64>,
    /// Highest live viewer count so far.
    pub peak_viewers: Option<u64>,
}
