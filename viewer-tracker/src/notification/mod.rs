//! Delivery of final reports and failure notices.
//!
//! A [`Notifier`] knows how to deliver one payload to one target; the
//! [`NotificationService`] runs deliveries on detached tasks with retries and
//! records the outcome on the job.

pub mod channels;
mod service;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::domain::{AnalysisReport, NotifyTarget, TrackingJob};

pub use service::{NotificationConfig, NotificationService};

/// What gets delivered when tracking concludes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    /// The broadcast ended and was analyzed.
    Report {
        job: TrackingJob,
        report: AnalysisReport,
    },
    /// Tracking gave up without a report.
    TrackingFailed { job: TrackingJob, reason: String },
}

impl NotificationPayload {
    pub fn report(job: TrackingJob, report: AnalysisReport) -> Self {
        Self::Report { job, report }
    }

    pub fn tracking_failed(job: TrackingJob) -> Self {
        let reason = job
            .failure_reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        Self::TrackingFailed { job, reason }
    }

    pub fn job(&self) -> &TrackingJob {
        match self {
            Self::Report { job, .. } | Self::TrackingFailed { job, .. } => job,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Report { .. } => "report",
            Self::TrackingFailed { .. } => "tracking_failed",
        }
    }
}

/// Outcome of a delivery attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel is not configured; nothing was sent.
    Skipped(String),
}

/// Delivers payloads to notification targets.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &NotifyTarget, payload: &NotificationPayload) -> Result<Delivery>;
}
