//! Per-job actor.
//!
//! The actor owns its job's in-memory state. Each tick polls the metadata
//! source, runs the state machine and commits the result before arming the
//! next timer; if the commit fails the in-memory state is left as it was and
//! the same poll is retried on the next tick. A write rejected because the
//! stored job is already terminal makes the actor adopt that state and exit.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{JobEvent, JobMessage};
use crate::analyzer::{AnalyzerConfig, analyze};
use crate::database::repositories::SampleStore;
use crate::domain::job::CANCELLED_REASON;
use crate::domain::{JobState, TrackingJob};
use crate::notification::{NotificationPayload, NotificationService};
use crate::source::{LiveStatus, MetadataSource};
use crate::tracker::cadence::VOLATILITY_WINDOW;
use crate::tracker::{PollOutcome, Step, TrackerConfig, step};
use crate::{Error, Result};

/// Everything a job actor needs from the outside world.
pub struct ActorContext {
    pub store: Arc<dyn SampleStore>,
    pub source: Arc<dyn MetadataSource>,
    pub notifications: Arc<NotificationService>,
    pub tracker: TrackerConfig,
    pub analyzer: AnalyzerConfig,
    pub events: broadcast::Sender<JobEvent>,
}

impl ActorContext {
    pub fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// How an actor's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorOutcome {
    /// The job reached a terminal state and was finalized.
    Finished(JobState),
    /// Another writer made the job terminal; nothing was finalized here.
    Superseded(JobState),
    /// The actor was stopped; the job stays persisted for recovery.
    Stopped,
}

pub struct JobActor {
    job: TrackingJob,
    /// Latest live viewer counts, oldest first.
    recent: VecDeque<u64>,
    ctx: Arc<ActorContext>,
    mailbox: mpsc::Receiver<JobMessage>,
    cancellation_token: CancellationToken,
    next_poll: Instant,
    /// Set when the store already holds a terminal version of the job.
    superseded: bool,
}

impl JobActor {
    /// Create an actor whose first poll is due immediately.
    pub fn new(
        job: TrackingJob,
        ctx: Arc<ActorContext>,
        mailbox: mpsc::Receiver<JobMessage>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            job,
            recent: VecDeque::with_capacity(VOLATILITY_WINDOW),
            ctx,
            mailbox,
            cancellation_token,
            next_poll: Instant::now(),
            superseded: false,
        }
    }

    pub async fn run(mut self) -> ActorOutcome {
        info!(
            job_id = %self.job.id,
            state = %self.job.state,
            broadcast = %self.job.broadcast_ref,
            "Job actor started"
        );

        if self.job.state == JobState::Live {
            self.reload_recent_counts().await;
        }

        loop {
            if self.superseded {
                return ActorOutcome::Superseded(self.job.state);
            }
            if self.job.is_terminal() {
                self.finish().await;
                return ActorOutcome::Finished(self.job.state);
            }

            let timer = sleep_until(self.next_poll);

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!(job_id = %self.job.id, "Job actor stopped");
                    return ActorOutcome::Stopped;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        debug!(job_id = %self.job.id, "Job actor mailbox closed");
                        return ActorOutcome::Stopped;
                    }
                },

                _ = timer => self.tick().await,
            }
        }
    }

    async fn handle_message(&mut self, msg: JobMessage) {
        match msg {
            JobMessage::Cancel(reply) => {
                let result = self.cancel().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn cancel(&mut self) -> Result<TrackingJob> {
        if self.job.is_terminal() {
            return Ok(self.job.clone());
        }

        let now = Utc::now();
        let mut next = self.job.clone();
        next.fail(now, CANCELLED_REASON)?;
        next.updated_at = now;
        if let Err(e) = self.ctx.store.update_job(&next).await {
            if self.adopt_terminal_from_store(&e).await {
                return Ok(self.job.clone());
            }
            return Err(e);
        }

        info!(job_id = %self.job.id, from = %self.job.state, "Job cancelled");
        self.commit(Step {
            job: next,
            sample: None,
        });
        Ok(self.job.clone())
    }

    /// One poll cycle.
    async fn tick(&mut self) {
        let outcome = self.poll().await;
        let recent: Vec<u64> = self.recent.iter().copied().collect();

        let next = match step(&self.job, outcome, &recent, Utc::now(), &self.ctx.tracker) {
            Ok(next) => next,
            Err(e) => {
                error!(job_id = %self.job.id, error = %e, "State machine rejected poll result");
                self.schedule_next();
                return;
            }
        };

        let persisted = match &next.sample {
            Some(sample) => self.ctx.store.append_sample(&next.job, sample).await,
            None => self.ctx.store.update_job(&next.job).await,
        };
        if let Err(e) = persisted {
            if self.adopt_terminal_from_store(&e).await {
                return;
            }
            warn!(
                job_id = %self.job.id,
                error = %e,
                "Failed to persist poll result, abandoning cycle"
            );
            self.schedule_next();
            return;
        }

        self.commit(next);
        self.schedule_next();
    }

    /// Adopt a persisted step and publish what changed.
    fn commit(&mut self, next: Step) {
        let Step { job, sample } = next;
        let previous = std::mem::replace(&mut self.job, job);

        if let Some(sample) = sample {
            if sample.is_live {
                if self.recent.len() == VOLATILITY_WINDOW {
                    self.recent.pop_front();
                }
                self.recent.push_back(sample.concurrent_viewers);
            }
            debug!(
                job_id = %self.job.id,
                viewers = sample.concurrent_viewers,
                is_live = sample.is_live,
                next_poll_secs = self.job.poll_interval.as_secs_f64(),
                "Sample recorded"
            );
            self.ctx.publish(JobEvent::SampleRecorded {
                job_id: self.job.id.clone(),
                sample,
            });
        }

        if previous.state != self.job.state {
            info!(
                job_id = %self.job.id,
                from = %previous.state,
                to = %self.job.state,
                reason = self.job.failure_reason.as_deref().unwrap_or_default(),
                "Job state changed"
            );
            self.ctx.publish(JobEvent::StateChanged {
                job_id: self.job.id.clone(),
                from: previous.state,
                to: self.job.state,
                reason: self.job.failure_reason.clone(),
                at: self.job.updated_at,
            });
        }
    }

    /// After a rejected write, take over the stored job if it is already
    /// terminal. Returns whether the actor must stop.
    async fn adopt_terminal_from_store(&mut self, err: &Error) -> bool {
        if !matches!(err, Error::StoreWrite(_)) {
            return false;
        }
        match self.ctx.store.get_job(&self.job.id).await {
            Ok(stored) if stored.is_terminal() => {
                info!(
                    job_id = %self.job.id,
                    state = %stored.state,
                    "Job was finished by another writer, stopping actor"
                );
                self.job = stored;
                self.superseded = true;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Failed to reload job after rejected write");
                false
            }
        }
    }

    async fn poll(&self) -> PollOutcome {
        let limit = self.ctx.tracker.poll_timeout;
        if self.job.state == JobState::Waiting {
            match timeout(limit, self.ctx.source.probe(&self.job.broadcast_ref)).await {
                Err(_) => return PollOutcome::timed_out(limit),
                Ok(Ok(LiveStatus::Live)) => {}
                Ok(result) => return PollOutcome::Probe(result),
            }
        }

        match timeout(limit, self.ctx.source.fetch(&self.job.broadcast_ref)).await {
            Err(_) => PollOutcome::timed_out(limit),
            Ok(result) => PollOutcome::Fetch(result),
        }
    }

    fn schedule_next(&mut self) {
        self.next_poll = Instant::now() + self.job.poll_interval;
    }

    async fn reload_recent_counts(&mut self) {
        match self
            .ctx
            .store
            .recent_live_counts(&self.job.id, VOLATILITY_WINDOW as u32)
            .await
        {
            Ok(counts) => self.recent = counts.into(),
            Err(e) => warn!(job_id = %self.job.id, error = %e, "Failed to reload recent samples"),
        }
    }

    async fn finish(&self) {
        let has_report = match self.job.state {
            JobState::Ended => match finalize_ended(&self.ctx, &self.job).await {
                Ok(has_report) => has_report,
                Err(e) => {
                    error!(
                        job_id = %self.job.id,
                        error = %e,
                        "Failed to finalize ended job; it will be retried on recovery"
                    );
                    false
                }
            },
            JobState::Failed => {
                if self.job.failure_reason.as_deref() != Some(CANCELLED_REASON) {
                    self.ctx
                        .notifications
                        .dispatch(NotificationPayload::tracking_failed(self.job.clone()));
                }
                false
            }
            JobState::Waiting | JobState::Live => false,
        };

        self.ctx.publish(JobEvent::Finished {
            job_id: self.job.id.clone(),
            state: self.job.state,
            has_report,
        });
    }
}

/// Analyze an ended job, persist the report and hand it to the notifier.
///
/// Returns whether a report was produced.
pub async fn finalize_ended(ctx: &ActorContext, job: &TrackingJob) -> Result<bool> {
    if job.state != JobState::Ended {
        return Err(Error::validation(format!(
            "job {} is {}, not ENDED",
            job.id, job.state
        )));
    }

    let history = ctx.store.list_job_history(&job.id).await?;
    let Some(report) = analyze(&job.id, &history, &ctx.analyzer) else {
        warn!(job_id = %job.id, "Ended job has no live samples, no report produced");
        return Ok(false);
    };

    ctx.store.save_report(&report).await?;
    info!(
        job_id = %job.id,
        peak = report.peak_viewers,
        samples = report.sample_count,
        "Analysis report saved"
    );

    ctx.notifications
        .dispatch(NotificationPayload::report(job.clone(), report));
    Ok(true)
}
