//! The scheduler: job table, lifecycle operations and recovery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::actor::{ActorContext, ActorOutcome, JobActor, finalize_ended};
use super::handle::{JobHandle, MAILBOX_CAPACITY};
use super::messages::JobEvent;
use crate::analyzer::AnalyzerConfig;
use crate::database::models::SampleStats;
use crate::database::repositories::SampleStore;
use crate::domain::job::CANCELLED_REASON;
use crate::domain::{AnalysisReport, BroadcastRef, JobState, NotifyTarget, Sample, TrackingJob};
use crate::notification::NotificationService;
use crate::source::MetadataSource;
use crate::tracker::TrackerConfig;
use crate::{Error, Result};

/// Restarts allowed for an actor that keeps panicking.
const MAX_ACTOR_RESTARTS: u32 = 3;

/// Times a cancel re-reads the job table after hitting an exiting actor.
const CANCEL_ATTEMPTS: u32 = 3;

const CANCEL_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Buffered job events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Collaborators of the scheduler.
pub struct SchedulerDeps {
    pub store: Arc<dyn SampleStore>,
    pub source: Arc<dyn MetadataSource>,
    pub notifications: Arc<NotificationService>,
    pub tracker: TrackerConfig,
    pub analyzer: AnalyzerConfig,
}

/// Job status as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub job: TrackingJob,
    #[serde(flatten)]
    pub stats: SampleStats,
    /// Whether an actor is currently polling this job.
    pub tracking: bool,
}

/// The report view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobReport {
    Ready { report: AnalysisReport },
    /// Still tracking, or ended and waiting for analysis.
    Pending { state: JobState },
    /// Tracking failed; there is no report.
    TrackingFailed { reason: String },
}

/// What [`Scheduler::recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub resumed: usize,
    pub already_running: usize,
    pub finalized: usize,
}

#[derive(Default)]
struct JobTable {
    handles: HashMap<String, JobHandle>,
    /// Normalized broadcast ref -> job id, for active or reserved jobs.
    by_ref: HashMap<String, String>,
    /// Jobs whose panicked actor is about to be respawned. A cancel that
    /// removes the entry wins over the restart.
    restarting: HashSet<String>,
}

struct Inner {
    ctx: Arc<ActorContext>,
    table: Mutex<JobTable>,
    cancellation_token: CancellationToken,
    tasks: TaskTracker,
    next_instance: AtomicU64,
}

/// Owns the set of running job actors.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = ActorContext {
            store: deps.store,
            source: deps.source,
            notifications: deps.notifications,
            tracker: deps.tracker,
            analyzer: deps.analyzer,
            events,
        };
        Self {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                table: Mutex::new(JobTable::default()),
                cancellation_token: CancellationToken::new(),
                tasks: TaskTracker::new(),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Start tracking a broadcast.
    pub async fn create(&self, broadcast_ref: &str, notify_target: &str) -> Result<TrackingJob> {
        if self.inner.cancellation_token.is_cancelled() {
            return Err(Error::Other("scheduler is shutting down".to_string()));
        }

        let broadcast_ref = BroadcastRef::new(broadcast_ref)?;
        let notify_target = NotifyTarget::parse(notify_target)?;
        let job = TrackingJob::new(
            broadcast_ref,
            notify_target,
            self.inner.ctx.tracker.waiting_interval,
        );

        // Reserve the ref before the insert so concurrent creates cannot race.
        {
            let mut table = self.inner.table.lock();
            if let Some(existing) = table.by_ref.get(job.broadcast_ref.as_str()) {
                return Err(Error::duplicate_job(job.broadcast_ref.as_str(), existing));
            }
            table
                .by_ref
                .insert(job.broadcast_ref.to_string(), job.id.clone());
        }

        if let Err(e) = self.inner.ctx.store.create_job(&job).await {
            self.inner.release_ref(job.broadcast_ref.as_str(), &job.id);
            return Err(e);
        }

        self.inner.spawn(job.clone(), 0);
        info!(
            job_id = %job.id,
            broadcast = %job.broadcast_ref,
            target = job.notify_target.channel_type(),
            "Tracking job created"
        );
        Ok(job)
    }

    /// Cancel a job. Terminal jobs are left as they are.
    pub async fn cancel(&self, job_id: &str) -> Result<JobState> {
        for _ in 0..CANCEL_ATTEMPTS {
            let Some(handle) = self.inner.handle_or_claim(job_id) else {
                return self.cancel_persisted(job_id).await;
            };
            match handle.cancel().await {
                Ok(job) => return Ok(job.state),
                // The actor exited meanwhile; it may be restarting.
                Err(Error::ActorStopped(_)) => tokio::time::sleep(CANCEL_RETRY_DELAY).await,
                Err(e) => return Err(e),
            }
        }
        self.inner.claim_restart(job_id);
        self.cancel_persisted(job_id).await
    }

    /// Cancel a job that has no running actor, straight in the store.
    async fn cancel_persisted(&self, job_id: &str) -> Result<JobState> {
        let mut job = self.inner.ctx.store.get_job(job_id).await?;
        if job.is_terminal() {
            return Ok(job.state);
        }

        let now = Utc::now();
        job.fail(now, CANCELLED_REASON)?;
        job.updated_at = now;
        if let Err(e) = self.inner.ctx.store.update_job(&job).await {
            // Lost the race against a writer that already finished the job.
            let stored = self.inner.ctx.store.get_job(job_id).await?;
            if stored.is_terminal() {
                return Ok(stored.state);
            }
            return Err(e);
        }

        info!(job_id = %job.id, "Cancelled job without a running actor");
        self.inner.ctx.publish(JobEvent::Finished {
            job_id: job.id.clone(),
            state: job.state,
            has_report: false,
        });
        Ok(job.state)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.inner.ctx.store.get_job(job_id).await?;
        let stats = self.inner.ctx.store.sample_stats(job_id).await?;
        Ok(JobStatus {
            job,
            stats,
            tracking: self.is_tracking(job_id),
        })
    }

    pub async fn report(&self, job_id: &str) -> Result<JobReport> {
        let job = self.inner.ctx.store.get_job(job_id).await?;
        if job.state == JobState::Failed {
            return Ok(JobReport::TrackingFailed {
                reason: job.failure_reason.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        Ok(match self.inner.ctx.store.get_report(job_id).await? {
            Some(report) => JobReport::Ready { report },
            None => JobReport::Pending { state: job.state },
        })
    }

    /// Full sample history of a job.
    pub async fn history(&self, job_id: &str) -> Result<Vec<Sample>> {
        // Surface NotFound instead of an empty list for unknown ids.
        self.inner.ctx.store.get_job(job_id).await?;
        self.inner.ctx.store.list_job_history(job_id).await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<TrackingJob>> {
        self.inner.ctx.store.list_recent_jobs(limit).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.ctx.events.subscribe()
    }

    /// Whether an actor is running, or about to be restarted, for the job.
    pub fn is_tracking(&self, job_id: &str) -> bool {
        let table = self.inner.table.lock();
        table.handles.contains_key(job_id) || table.restarting.contains(job_id)
    }

    /// Ids of jobs with a running actor.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.table.lock().handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resume unfinished jobs after a restart.
    ///
    /// Spawns an actor for every persisted WAITING/LIVE job that is not
    /// already running, then finalizes ENDED jobs that never got a report.
    pub async fn recover(&self) -> Result<RecoverySummary> {
        let mut summary = RecoverySummary::default();

        for job in self.inner.ctx.store.load_active_jobs().await? {
            let job_id = job.id.clone();
            if self.inner.spawn(job, 0) {
                summary.resumed += 1;
            } else {
                debug!(job_id = %job_id, "Job already running, not resuming");
                summary.already_running += 1;
            }
        }

        for job in self.inner.ctx.store.list_ended_without_report().await? {
            match finalize_ended(&self.inner.ctx, &job).await {
                Ok(true) => summary.finalized += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to finalize ended job"),
            }
        }

        info!(
            resumed = summary.resumed,
            already_running = summary.already_running,
            finalized = summary.finalized,
            "Recovery complete"
        );
        Ok(summary)
    }

    /// Stop every actor and wait up to `timeout` for them to exit.
    ///
    /// Jobs stay persisted in their current state for the next recovery.
    pub async fn shutdown(&self, timeout: Duration) {
        info!(active = self.active_jobs().len(), "Shutting down scheduler");
        self.inner.cancellation_token.cancel();
        self.inner.tasks.close();
        if tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!("Job actors did not stop within {:?}", timeout);
        }
        self.inner.ctx.notifications.shutdown(timeout).await;
    }
}

impl Inner {
    /// Spawn an actor for `job` unless one is already running.
    fn spawn(self: &Arc<Self>, job: TrackingJob, restarts: u32) -> bool {
        self.spawn_actor(job, restarts, false)
    }

    /// Respawn a panicked actor, unless a cancel claimed the job first.
    fn respawn(self: &Arc<Self>, job: TrackingJob, restarts: u32) -> bool {
        self.spawn_actor(job, restarts, true)
    }

    fn spawn_actor(self: &Arc<Self>, job: TrackingJob, restarts: u32, restart: bool) -> bool {
        let job_id = job.id.clone();
        let broadcast_ref = job.broadcast_ref.to_string();
        let (sender, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let token = self.cancellation_token.child_token();
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);

        {
            let mut table = self.table.lock();
            if table.handles.contains_key(&job_id) {
                return false;
            }
            if restart && !table.restarting.remove(&job_id) {
                return false;
            }
            table.handles.insert(
                job_id.clone(),
                JobHandle::new(&job_id, instance, sender),
            );
            table.by_ref.insert(broadcast_ref.clone(), job_id.clone());
        }

        let actor = JobActor::new(job, Arc::clone(&self.ctx), mailbox, token);
        let join = tokio::spawn(actor.run());

        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            inner
                .supervise(job_id, broadcast_ref, instance, join, restarts)
                .await;
        });
        true
    }

    /// Wait for an actor to exit, clean up its entry and restart it on panic.
    async fn supervise(
        self: Arc<Self>,
        job_id: String,
        broadcast_ref: String,
        instance: u64,
        join: JoinHandle<ActorOutcome>,
        restarts: u32,
    ) {
        let result = join.await;
        let panicked = matches!(&result, Err(e) if e.is_panic());
        let will_restart = panicked
            && !self.cancellation_token.is_cancelled()
            && restarts < MAX_ACTOR_RESTARTS;
        self.remove(&job_id, &broadcast_ref, instance, will_restart);

        match result {
            Ok(outcome) => debug!(job_id = %job_id, ?outcome, "Job actor exited"),
            Err(_) if panicked => {
                error!(job_id = %job_id, restarts, "Job actor panicked");
                if will_restart {
                    self.restart(&job_id, &broadcast_ref, restarts + 1).await;
                } else if !self.cancellation_token.is_cancelled() {
                    error!(
                        job_id = %job_id,
                        "Job actor exceeded its restart budget, leaving job idle"
                    );
                    self.announce_idle(&job_id).await;
                }
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "Job actor was aborted"),
        }
    }

    async fn restart(self: &Arc<Self>, job_id: &str, broadcast_ref: &str, attempt: u32) {
        match self.ctx.store.get_job(job_id).await {
            Ok(job) if job.state.is_active() => {
                if self.respawn(job, attempt) {
                    info!(job_id = %job_id, attempt, "Restarted job actor");
                    return;
                }
                info!(job_id = %job_id, "Job was cancelled while its actor restarted");
            }
            Ok(_) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to reload job for restart"),
        }
        self.abandon_restart(job_id, broadcast_ref);
    }

    /// Tell subscribers that no actor will touch the job again.
    async fn announce_idle(&self, job_id: &str) {
        match self.ctx.store.get_job(job_id).await {
            Ok(job) => self.ctx.publish(JobEvent::Finished {
                job_id: job.id,
                state: job.state,
                has_report: false,
            }),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to load idle job"),
        }
    }

    /// The running handle for a job, or `None` after claiming any pending
    /// restart so the caller can act on the stored job alone.
    fn handle_or_claim(&self, job_id: &str) -> Option<JobHandle> {
        let mut table = self.table.lock();
        if let Some(handle) = table.handles.get(job_id) {
            return Some(handle.clone());
        }
        table.restarting.remove(job_id);
        None
    }

    fn claim_restart(&self, job_id: &str) {
        self.table.lock().restarting.remove(job_id);
    }

    fn abandon_restart(&self, job_id: &str, broadcast_ref: &str) {
        let mut table = self.table.lock();
        table.restarting.remove(job_id);
        if !table.handles.contains_key(job_id)
            && table.by_ref.get(broadcast_ref).is_some_and(|id| id == job_id)
        {
            table.by_ref.remove(broadcast_ref);
        }
    }

    /// Drop an exited actor's entry. With `restart` the broadcast ref stays
    /// reserved and the job is marked as restarting, atomically.
    fn remove(&self, job_id: &str, broadcast_ref: &str, instance: u64, restart: bool) {
        let mut table = self.table.lock();
        if table
            .handles
            .get(job_id)
            .is_some_and(|h| h.instance == instance)
        {
            table.handles.remove(job_id);
        }
        if restart {
            table.restarting.insert(job_id.to_string());
            return;
        }
        if !table.handles.contains_key(job_id)
            && table.by_ref.get(broadcast_ref).is_some_and(|id| id == job_id)
        {
            table.by_ref.remove(broadcast_ref);
        }
    }

    fn release_ref(&self, broadcast_ref: &str, job_id: &str) {
        let mut table = self.table.lock();
        if table.by_ref.get(broadcast_ref).is_some_and(|id| id == job_id) {
            table.by_ref.remove(broadcast_ref);
        }
    }
}
