//! Analysis report produced when a job ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post-mortem summary of a tracked broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub job_id: String,
    pub peak_viewers: u64,
    pub peak_at: DateTime<Utc>,
    /// Seconds between the first and last live sample.
    pub duration_secs: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub average_viewers: f64,
    pub min_viewers: u64,
    pub sample_count: usize,
    pub segment_averages: Vec<SegmentAverage>,
    pub spikes: Vec<Spike>,
    pub decline_onset: Option<DateTime<Utc>>,
}

/// Average viewers over one fixed window.
///
/// `avg` is `None` when the window holds no samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAverage {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub avg: Option<f64>,
    pub sample_count: usize,
}

impl SegmentAverage {
    pub fn has_data(&self) -> bool {
        self.avg.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeDirection {
    Up,
    Down,
}

/// A sudden change between two consecutive samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    /// Time of the later sample.
    pub at: DateTime<Utc>,
    /// Relative change, `(next - prev) / max(prev, 1)`.
    pub delta: f64,
    pub direction: SpikeDirection,
    pub from: u64,
    pub to: u64,
}

impl AnalysisReport {
    /// Format the duration as `Hh Mm` / `Mm Ss`.
    pub fn duration_display(&self) -> String {
        let total = self.duration_secs.max(0);
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m {seconds}s")
        }
    }
}
