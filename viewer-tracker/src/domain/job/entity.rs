//! Tracking job entity.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobState;
use crate::Error;
use crate::domain::{BroadcastRef, NotifyTarget};

/// Reason recorded when an operator cancels a job.
pub const CANCELLED_REASON: &str = "cancelled";

/// A tracked broadcast and everything the tracker knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingJob {
    pub id: String,
    pub broadcast_ref: BroadcastRef,
    pub notify_target: NotifyTarget,
    pub state: JobState,
    /// Current polling cadence.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    pub consecutive_failures: u32,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub failure_reason: Option<String>,
    /// Observation time of the newest persisted sample.
    pub last_sample_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_live_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    pub notification_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingJob {
    /// Create a new job in the WAITING state.
    pub fn new(
        broadcast_ref: BroadcastRef,
        notify_target: NotifyTarget,
        poll_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            broadcast_ref,
            notify_target,
            state: JobState::Waiting,
            poll_interval,
            consecutive_failures: 0,
            title: None,
            channel: None,
            failure_reason: None,
            last_sample_at: None,
            created_at: now,
            started_live_at: None,
            ended_at: None,
            notified_at: None,
            notification_error: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transition to LIVE.
    pub fn go_live(&mut self, started_at: DateTime<Utc>) -> Result<(), Error> {
        self.state = self.state.transition_to(JobState::Live)?;
        self.started_live_at.get_or_insert(started_at);
        Ok(())
    }

    /// Transition to ENDED, recording why tracking stopped.
    pub fn end(&mut self, at: DateTime<Utc>, reason: impl Into<String>) -> Result<(), Error> {
        self.state = self.state.transition_to(JobState::Ended)?;
        self.ended_at = Some(at);
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Transition to FAILED.
    pub fn fail(&mut self, at: DateTime<Utc>, reason: impl Into<String>) -> Result<(), Error> {
        self.state = self.state.transition_to(JobState::Failed)?;
        self.ended_at = Some(at);
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Record a failed poll, returning the new failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Clamp an observation time so samples never move backwards.
    pub fn clamp_observed_at(&self, observed_at: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_sample_at {
            Some(last) if observed_at < last => last,
            _ => observed_at,
        }
    }

    /// How long the broadcast has been tracked as live.
    pub fn live_duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_live_at.map(|started| now - started)
    }

    /// Title if known, otherwise the broadcast reference.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.broadcast_ref.as_str())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
