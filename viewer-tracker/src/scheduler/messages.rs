//! Messages exchanged with job actors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::Result;
use crate::domain::{JobState, Sample, TrackingJob};

/// Messages accepted by a job actor.
#[derive(Debug)]
pub enum JobMessage {
    /// Stop tracking. Replies with the job as persisted afterwards.
    Cancel(oneshot::Sender<Result<TrackingJob>>),
}

/// Updates published by job actors.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    StateChanged {
        job_id: String,
        from: JobState,
        to: JobState,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    SampleRecorded { job_id: String, sample: Sample },
    /// No actor will change the job again. Usually the job is terminal; an
    /// active state means it was left idle after repeated actor panics.
    Finished {
        job_id: String,
        state: JobState,
        has_report: bool,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::StateChanged { job_id, .. }
            | Self::SampleRecorded { job_id, .. }
            | Self::Finished { job_id, .. } => job_id,
        }
    }

    /// Event name used for server-sent events.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::SampleRecorded { .. } => "sample_recorded",
            Self::Finished { .. } => "finished",
        }
    }
}
