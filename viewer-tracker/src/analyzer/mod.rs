//! Post-broadcast analysis of viewer samples.
//!
//! [`analyze`] is a pure function over the ordered sample history of a job.
//! Only samples taken while the broadcast was live are considered.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{AnalysisReport, Sample, SegmentAverage, Spike, SpikeDirection};
use crate::{Error, Result};

/// Analysis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Width of the segment-average windows.
    pub window: Duration,
    /// Relative change above which a consecutive pair is a spike.
    pub spike_threshold: f64,
    /// Length of the strictly decreasing run that marks a decline.
    pub decline_run: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            spike_threshold: 0.2,
            decline_run: 3,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window.as_millis() == 0 {
            return Err(Error::config("analysis window must be at least 1ms"));
        }
        if !self.spike_threshold.is_finite() || self.spike_threshold < 0.0 {
            return Err(Error::config("spike threshold must be a non-negative number"));
        }
        if self.decline_run == 0 {
            return Err(Error::config("decline run length must be at least 1"));
        }
        Ok(())
    }
}

/// Build the report for a finished job. Returns `None` without live samples.
pub fn analyze(job_id: &str, samples: &[Sample], config: &AnalyzerConfig) -> Option<AnalysisReport> {
    let mut live: Vec<&Sample> = samples.iter().filter(|s| s.is_live).collect();
    // Stable, so equal timestamps keep insertion order.
    live.sort_by_key(|s| s.observed_at);

    let first = *live.first()?;
    let last = *live.last()?;
    let counts: Vec<u64> = live.iter().map(|s| s.concurrent_viewers).collect();

    let peak_idx = peak_index(&counts)?;
    let total: u64 = counts.iter().sum();

    Some(AnalysisReport {
        job_id: job_id.to_string(),
        peak_viewers: counts[peak_idx],
        peak_at: live[peak_idx].observed_at,
        duration_secs: (last.observed_at - first.observed_at).num_seconds(),
        started_at: first.observed_at,
        ended_at: last.observed_at,
        average_viewers: round2(total as f64 / counts.len() as f64),
        min_viewers: counts.iter().copied().min().unwrap_or_default(),
        sample_count: counts.len(),
        segment_averages: segment_averages(&live, config.window),
        spikes: spikes(&live, config.spike_threshold),
        decline_onset: decline_onset(&counts, peak_idx, config.decline_run)
            .map(|idx| live[idx].observed_at),
    })
}

/// Index of the maximum count; ties go to the earliest.
fn peak_index(counts: &[u64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, &count) in counts.iter().enumerate() {
        if best.is_none_or(|b| count > counts[b]) {
            best = Some(idx);
        }
    }
    best
}

fn segment_averages(live: &[&Sample], window: Duration) -> Vec<SegmentAverage> {
    let (Some(first), Some(last)) = (live.first(), live.last()) else {
        return Vec::new();
    };
    let window_ms = (window.as_millis() as i64).max(1);
    let origin = first.observed_at;
    let span_ms = (last.observed_at - origin).num_milliseconds().max(0);
    let windows = ((span_ms + window_ms - 1) / window_ms).max(1) as usize;

    let mut sums = vec![(0u64, 0usize); windows];
    for sample in live {
        let offset = (sample.observed_at - origin).num_milliseconds().max(0);
        // The final sample may sit exactly on the closing boundary.
        let idx = ((offset / window_ms) as usize).min(windows - 1);
        sums[idx].0 += sample.concurrent_viewers;
        sums[idx].1 += 1;
    }

    sums.into_iter()
        .enumerate()
        .map(|(idx, (sum, n))| SegmentAverage {
            window_start: offset_by(origin, idx as i64 * window_ms),
            window_end: offset_by(origin, (idx as i64 + 1) * window_ms),
            avg: (n > 0).then(|| round2(sum as f64 / n as f64)),
            sample_count: n,
        })
        .collect()
}

fn spikes(live: &[&Sample], threshold: f64) -> Vec<Spike> {
    live.windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0].concurrent_viewers, pair[1].concurrent_viewers);
            let delta = (next as f64 - prev as f64) / (prev.max(1) as f64);
            (delta.abs() > threshold).then(|| Spike {
                at: pair[1].observed_at,
                delta: round4(delta),
                direction: if delta > 0.0 {
                    SpikeDirection::Up
                } else {
                    SpikeDirection::Down
                },
                from: prev,
                to: next,
            })
        })
        .collect()
}

/// First index after the peak that starts a run of `run` samples, each
/// strictly higher than the next, provided nothing after it climbs back to
/// the peak.
fn decline_onset(counts: &[u64], peak_idx: usize, run: usize) -> Option<usize> {
    let peak = counts[peak_idx];
    // Any return to the peak level resets the search.
    let last_at_peak = counts
        .iter()
        .rposition(|&c| c >= peak)
        .unwrap_or(peak_idx);

    (last_at_peak + 1..counts.len()).find(|&start| {
        start + run <= counts.len()
            && (start..start + run - 1).all(|i| counts[i] > counts[i + 1])
    })
}

fn offset_by(origin: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
    origin + TimeDelta::milliseconds(ms)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
