//! Tracking job database model.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, opt_datetime_to_ms, opt_ms_to_datetime};
use crate::domain::{BroadcastRef, JobState, NotifyTarget, TrackingJob};
use crate::{Error, Result};

/// Row of the `tracking_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrackingJobDbModel {
    pub id: String,
    pub broadcast_ref: String,
    pub notify_target: String,
    /// WAITING, LIVE, ENDED or FAILED.
    pub state: String,
    pub poll_interval_ms: i64,
    pub consecutive_failures: i64,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub failure_reason: Option<String>,
    /// Epoch milliseconds (UTC) of the newest persisted sample.
    pub last_sample_at: Option<i64>,
    pub created_at: i64,
    pub started_live_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub notified_at: Option<i64>,
    pub notification_error: Option<String>,
    pub updated_at: i64,
}

impl From<&TrackingJob> for TrackingJobDbModel {
    fn from(job: &TrackingJob) -> Self {
        Self {
            id: job.id.clone(),
            broadcast_ref: job.broadcast_ref.as_str().to_string(),
            notify_target: job.notify_target.to_string(),
            state: job.state.as_str().to_string(),
            poll_interval_ms: job.poll_interval.as_millis() as i64,
            consecutive_failures: i64::from(job.consecutive_failures),
            title: job.title.clone(),
            channel: job.channel.clone(),
            failure_reason: job.failure_reason.clone(),
            last_sample_at: opt_datetime_to_ms(job.last_sample_at),
            created_at: job.created_at.timestamp_millis(),
            started_live_at: opt_datetime_to_ms(job.started_live_at),
            ended_at: opt_datetime_to_ms(job.ended_at),
            notified_at: opt_datetime_to_ms(job.notified_at),
            notification_error: job.notification_error.clone(),
            updated_at: job.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<TrackingJobDbModel> for TrackingJob {
    type Error = Error;

    fn try_from(row: TrackingJobDbModel) -> Result<Self> {
        let state = JobState::parse(&row.state).ok_or_else(|| {
            Error::Other(format!("job {} has unknown state '{}'", row.id, row.state))
        })?;
        let notify_target = NotifyTarget::parse(&row.notify_target)?;

        Ok(Self {
            id: row.id,
            broadcast_ref: BroadcastRef::from_trusted(row.broadcast_ref),
            notify_target,
            state,
            poll_interval: Duration::from_millis(row.poll_interval_ms.max(0) as u64),
            consecutive_failures: u32::try_from(row.consecutive_failures.max(0))
                .unwrap_or(u32::MAX),
            title: row.title,
            channel: row.channel,
            failure_reason: row.failure_reason,
            last_sample_at: opt_ms_to_datetime(row.last_sample_at),
            created_at: ms_to_datetime(row.created_at),
            started_live_at: opt_ms_to_datetime(row.started_live_at),
            ended_at: opt_ms_to_datetime(row.ended_at),
            notified_at: opt_ms_to_datetime(row.notified_at),
            notification_error: row.notification_error,
            updated_at: ms_to_datetime(row.updated_at),
        })
    }
}
