//! The tracking job state machine.
//!
//! [`step`] folds one poll result into a job and returns the job to persist
//! together with the sample to append, if any. It performs no I/O, so the
//! caller decides when (and whether) the new state becomes durable.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{TrackerConfig, cadence};
use crate::Result;
use crate::domain::{JobState, Sample, TrackingJob};
use crate::source::{FetchError, LiveStatus, Snapshot};

pub const ALREADY_ENDED_REASON: &str = "already ended before tracking began";
pub const BROADCAST_ENDED_REASON: &str = "broadcast ended";
pub const MAX_DURATION_REASON: &str = "maximum tracking duration reached";

/// Result of one poll of the metadata source.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The liveness probe answered and no fetch followed.
    Probe(std::result::Result<LiveStatus, FetchError>),
    /// A full snapshot was requested.
    Fetch(std::result::Result<Snapshot, FetchError>),
}

impl PollOutcome {
    /// A poll that did not finish in time.
    pub fn timed_out(timeout: std::time::Duration) -> Self {
        Self::Fetch(Err(FetchError::Transient(format!(
            "poll timed out after {}s",
            timeout.as_secs_f64()
        ))))
    }
}

/// The next state of a job after one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub job: TrackingJob,
    /// Sample to append in the same transaction as the job update.
    pub sample: Option<Sample>,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }
}

/// Apply a poll outcome to `job`.
///
/// `recent` holds the latest live viewer counts, oldest first, and feeds the
/// adaptive cadence. Terminal jobs are returned unchanged.
pub fn step(
    job: &TrackingJob,
    outcome: PollOutcome,
    recent: &[u64],
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<Step> {
    let mut next = Step {
        job: job.clone(),
        sample: None,
    };
    match job.state {
        JobState::Waiting => step_waiting(&mut next, outcome, now, config)?,
        JobState::Live => step_live(&mut next, outcome, recent, now, config)?,
        JobState::Ended | JobState::Failed => return Ok(next),
    }
    next.job.updated_at = now;

    if next.job.state != job.state {
        debug!(
            job_id = %job.id,
            from = %job.state,
            to = %next.job.state,
            reason = next.job.failure_reason.as_deref().unwrap_or_default(),
            "Job state changed"
        );
    }
    Ok(next)
}

fn step_waiting(
    next: &mut Step,
    outcome: PollOutcome,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<()> {
    let job = &mut next.job;
    match outcome {
        PollOutcome::Probe(Ok(LiveStatus::Ended))
        | PollOutcome::Probe(Err(FetchError::PermanentEnd(_)))
        | PollOutcome::Fetch(Err(FetchError::PermanentEnd(_))) => {
            job.fail(now, ALREADY_ENDED_REASON)?;
        }
        PollOutcome::Probe(Ok(_)) => {
            job.reset_failures();
            job.poll_interval = config.waiting_interval;
        }
        PollOutcome::Probe(Err(e)) | PollOutcome::Fetch(Err(e)) => {
            record_failure(job, &e, now, config)?;
        }
        PollOutcome::Fetch(Ok(snapshot)) => {
            absorb_metadata(job, &snapshot);
            if !snapshot.is_live {
                job.reset_failures();
                job.poll_interval = config.waiting_interval;
                return Ok(());
            }
            let Some(viewers) = usable_viewers(&snapshot) else {
                let err = unusable_count(&snapshot);
                return record_failure(job, &err, now, config);
            };

            let observed_at = job.clamp_observed_at(snapshot.observed_at);
            job.go_live(observed_at)?;
            job.reset_failures();
            job.poll_interval = config.live_interval;
            job.last_sample_at = Some(observed_at);
            next.sample = Some(Sample::new(&job.id, observed_at, viewers, true));
        }
    }
    Ok(())
}

fn step_live(
    next: &mut Step,
    outcome: PollOutcome,
    recent: &[u64],
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<()> {
    let job = &mut next.job;
    match outcome {
        PollOutcome::Fetch(Ok(snapshot)) if snapshot.is_live => {
            absorb_metadata(job, &snapshot);
            let Some(viewers) = usable_viewers(&snapshot) else {
                let err = unusable_count(&snapshot);
                record_failure(job, &err, now, config)?;
                return end_if_overdue(job, now, config);
            };

            let observed_at = job.clamp_observed_at(snapshot.observed_at);
            job.reset_failures();
            job.last_sample_at = Some(observed_at);
            next.sample = Some(Sample::new(&job.id, observed_at, viewers, true));

            let mut counts: Vec<u64> = recent.to_vec();
            counts.push(viewers);
            let start = counts.len().saturating_sub(cadence::VOLATILITY_WINDOW);
            job.poll_interval = cadence::next_interval(job.poll_interval, &counts[start..], config);

            end_if_overdue(job, now, config)?;
        }
        PollOutcome::Fetch(Ok(snapshot)) => {
            // Live -> not-live edge: keep the final observation.
            absorb_metadata(job, &snapshot);
            let observed_at = job.clamp_observed_at(snapshot.observed_at);
            let viewers = snapshot.concurrent_viewers.unwrap_or(0).max(0) as u64;
            job.reset_failures();
            job.last_sample_at = Some(observed_at);
            job.end(now, BROADCAST_ENDED_REASON)?;
            next.sample = Some(Sample::new(&job.id, observed_at, viewers, false));
        }
        PollOutcome::Probe(Ok(LiveStatus::Ended))
        | PollOutcome::Probe(Err(FetchError::PermanentEnd(_)))
        | PollOutcome::Fetch(Err(FetchError::PermanentEnd(_))) => {
            job.end(now, BROADCAST_ENDED_REASON)?;
        }
        PollOutcome::Probe(Ok(_)) => {
            end_if_overdue(job, now, config)?;
        }
        PollOutcome::Probe(Err(e)) | PollOutcome::Fetch(Err(e)) => {
            record_failure(job, &e, now, config)?;
            end_if_overdue(job, now, config)?;
        }
    }
    Ok(())
}

/// Count a failed poll and fail the job once the threshold is exceeded.
fn record_failure(
    job: &mut TrackingJob,
    err: &FetchError,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> Result<()> {
    let failures = job.record_failure();
    if failures > config.failure_threshold {
        job.fail(
            now,
            format!("{failures} consecutive poll failures, last error: {err}"),
        )?;
    }
    Ok(())
}

fn end_if_overdue(job: &mut TrackingJob, now: DateTime<Utc>, config: &TrackerConfig) -> Result<()> {
    if job.state != JobState::Live {
        return Ok(());
    }
    let max = chrono::Duration::from_std(config.max_live_duration).unwrap_or(chrono::Duration::MAX);
    if job.live_duration(now).is_some_and(|elapsed| elapsed >= max) {
        job.end(now, MAX_DURATION_REASON)?;
    }
    Ok(())
}

fn absorb_metadata(job: &mut TrackingJob, snapshot: &Snapshot) {
    if let Some(title) = snapshot.title.as_ref().filter(|t| !t.is_empty()) {
        job.title = Some(title.clone());
    }
    if let Some(channel) = snapshot.channel.as_ref().filter(|c| !c.is_empty()) {
        job.channel = Some(channel.clone());
    }
}

fn usable_viewers(snapshot: &Snapshot) -> Option<u64> {
    snapshot
        .concurrent_viewers
        .and_then(|v| u64::try_from(v).ok())
}

fn unusable_count(snapshot: &Snapshot) -> FetchError {
    match snapshot.concurrent_viewers {
        Some(v) => FetchError::Transient(format!("negative viewer count {v}")),
        None => FetchError::Transient("live snapshot without a viewer count".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::domain::{BroadcastRef, NotifyTarget};

    fn config() -> TrackerConfig {
        TrackerConfig {
            failure_threshold: 2,
            ..TrackerConfig::default()
        }
    }

    fn waiting_job() -> TrackingJob {
        TrackingJob::new(
            BroadcastRef::new("dQw4w9WgXcQ").unwrap(),
            NotifyTarget::parse("ops@example.com").unwrap(),
            Duration::from_secs(60),
        )
    }

    fn snapshot(is_live: bool, viewers: Option<i64>, at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            is_live,
            concurrent_viewers: viewers,
            title: Some("Launch stream".to_string()),
            channel: Some("Space".to_string()),
            started_at: None,
            observed_at: at,
        }
    }

    fn live_job(now: DateTime<Utc>) -> TrackingJob {
        let step = step(
            &waiting_job(),
            PollOutcome::Fetch(Ok(snapshot(true, Some(100), now))),
            &[],
            now,
            &config(),
        )
        .unwrap();
        step.job
    }

    #[test]
    fn test_waiting_not_live_stays_waiting() {
        let mut job = waiting_job();
        job.consecutive_failures = 2;
        let next = step(
            &job,
            PollOutcome::Probe(Ok(LiveStatus::Upcoming)),
            &[],
            Utc::now(),
            &config(),
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Waiting);
        assert_eq!(next.job.consecutive_failures, 0);
        assert_eq!(next.job.poll_interval, config().waiting_interval);
        assert!(next.sample.is_none());
    }

    #[test]
    fn test_waiting_goes_live_with_first_sample() {
        let now = Utc::now();
        let next = step(
            &waiting_job(),
            PollOutcome::Fetch(Ok(snapshot(true, Some(100), now))),
            &[],
            now,
            &config(),
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Live);
        assert_eq!(next.job.started_live_at, Some(now));
        assert_eq!(next.job.poll_interval, config().live_interval);
        assert_eq!(next.job.title.as_deref(), Some("Launch stream"));
        let sample = next.sample.unwrap();
        assert_eq!(sample.concurrent_viewers, 100);
        assert!(sample.is_live);
    }

    #[test]
    fn test_already_ended_fails() {
        for outcome in [
            PollOutcome::Probe(Ok(LiveStatus::Ended)),
            PollOutcome::Probe(Err(FetchError::PermanentEnd("gone".into()))),
        ] {
            let next = step(&waiting_job(), outcome, &[], Utc::now(), &config()).unwrap();
            assert_eq!(next.job.state, JobState::Failed);
            assert_eq!(next.job.failure_reason.as_deref(), Some(ALREADY_ENDED_REASON));
            assert!(next.sample.is_none());
        }
    }

    #[test]
    fn test_waiting_fails_after_exceeding_threshold() {
        let config = config();
        let mut job = waiting_job();
        for expected in 1..=config.failure_threshold {
            job = step(
                &job,
                PollOutcome::Probe(Err(FetchError::Transient("boom".into()))),
                &[],
                Utc::now(),
                &config,
            )
            .unwrap()
            .job;
            assert_eq!(job.state, JobState::Waiting);
            assert_eq!(job.consecutive_failures, expected);
        }

        let next = step(
            &job,
            PollOutcome::Probe(Err(FetchError::NotFound("missing".into()))),
            &[],
            Utc::now(),
            &config,
        )
        .unwrap();
        assert_eq!(next.job.state, JobState::Failed);
        assert!(next.job.ended_at.is_some());
    }

    #[test]
    fn test_live_sample_adapts_cadence() {
        let now = Utc::now();
        let job = live_job(now);
        let later = now + TimeDelta::seconds(30);
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(400), later))),
            &[100],
            later,
            &config(),
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Live);
        assert_eq!(next.job.poll_interval, Duration::from_secs(15));
        assert_eq!(next.job.last_sample_at, Some(later));
        assert_eq!(next.sample.unwrap().concurrent_viewers, 400);
    }

    #[test]
    fn test_negative_count_is_transient_failure() {
        let now = Utc::now();
        let job = live_job(now);
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(-5), now))),
            &[100],
            now,
            &config(),
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Live);
        assert_eq!(next.job.consecutive_failures, 1);
        assert_eq!(next.job.poll_interval, job.poll_interval);
        assert!(next.sample.is_none());
    }

    #[test]
    fn test_live_to_not_live_ends_with_final_sample() {
        let now = Utc::now();
        let job = live_job(now);
        let later = now + TimeDelta::seconds(30);
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(false, None, later))),
            &[100],
            later,
            &config(),
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Ended);
        assert_eq!(next.job.failure_reason.as_deref(), Some(BROADCAST_ENDED_REASON));
        let sample = next.sample.unwrap();
        assert!(!sample.is_live);
        assert_eq!(sample.concurrent_viewers, 0);
    }

    #[test]
    fn test_live_permanent_end_has_no_sample() {
        let now = Utc::now();
        let next = step(
            &live_job(now),
            PollOutcome::Fetch(Err(FetchError::PermanentEnd("removed".into()))),
            &[100],
            now,
            &config(),
        )
        .unwrap();
        assert_eq!(next.job.state, JobState::Ended);
        assert!(next.sample.is_none());
    }

    #[test]
    fn test_live_errors_keep_cadence_until_threshold() {
        let now = Utc::now();
        let mut job = live_job(now);
        let interval = job.poll_interval;
        for _ in 0..config().failure_threshold {
            job = step(
                &job,
                PollOutcome::timed_out(Duration::from_secs(30)),
                &[100],
                now,
                &config(),
            )
            .unwrap()
            .job;
            assert_eq!(job.state, JobState::Live);
            assert_eq!(job.poll_interval, interval);
        }
        let next = step(
            &job,
            PollOutcome::Fetch(Err(FetchError::Transient("503".into()))),
            &[100],
            now,
            &config(),
        )
        .unwrap();
        assert_eq!(next.job.state, JobState::Failed);
    }

    #[test]
    fn test_success_resets_failures() {
        let now = Utc::now();
        let mut job = live_job(now);
        job.consecutive_failures = 2;
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(100), now))),
            &[100],
            now,
            &config(),
        )
        .unwrap();
        assert_eq!(next.job.consecutive_failures, 0);
    }

    #[test]
    fn test_max_duration_ends_job() {
        let config = TrackerConfig {
            max_live_duration: Duration::from_secs(3600),
            ..config()
        };
        let now = Utc::now();
        let job = live_job(now);
        let later = now + TimeDelta::hours(1);
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(120), later))),
            &[100],
            later,
            &config,
        )
        .unwrap();

        assert_eq!(next.job.state, JobState::Ended);
        assert_eq!(next.job.failure_reason.as_deref(), Some(MAX_DURATION_REASON));
        assert!(next.sample.unwrap().is_live);
    }

    #[test]
    fn test_observed_at_never_moves_backwards() {
        let now = Utc::now();
        let job = live_job(now);
        let earlier = now - TimeDelta::seconds(10);
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(90), earlier))),
            &[100],
            now,
            &config(),
        )
        .unwrap();
        assert_eq!(next.sample.unwrap().observed_at, now);
    }

    #[test]
    fn test_terminal_job_is_untouched() {
        let mut job = waiting_job();
        job.fail(Utc::now(), "cancelled").unwrap();
        let next = step(
            &job,
            PollOutcome::Fetch(Ok(snapshot(true, Some(1), Utc::now()))),
            &[],
            Utc::now(),
            &config(),
        )
        .unwrap();
        assert_eq!(next.job, job);
        assert!(next.sample.is_none());
    }
}
