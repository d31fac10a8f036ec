#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;

use viewer_tracker::Result;
use viewer_tracker::analyzer::AnalyzerConfig;
use viewer_tracker::database::repositories::{SampleStore, SqlxSampleStore};
use viewer_tracker::database::{self, DbPool, WritePool};
use viewer_tracker::domain::{BroadcastRef, NotifyTarget, RetryPolicy};
use viewer_tracker::notification::{
    Delivery, NotificationPayload, NotificationService, Notifier,
};
use viewer_tracker::scheduler::{Scheduler, SchedulerDeps};
use viewer_tracker::source::{FetchError, LiveStatus, MetadataSource, Snapshot};
use viewer_tracker::tracker::TrackerConfig;

pub const STREAM_A: &str = "https://www.youtube.com/watch?v=aaaaaaaaaaa";
pub const STREAM_B: &str = "https://www.youtube.com/watch?v=bbbbbbbbbbb";
pub const TARGET: &str = "ops@example.com";

/// What the scripted source answers on its next poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Upcoming,
    Live(i64),
    /// Not live, no viewer count.
    Offline,
    Transient,
    Ended,
    /// Never answers; the poll times out.
    Hang,
    /// Answers like `Upcoming` after the given number of milliseconds.
    Delay(u64),
    Panic,
}

/// In-process metadata source driven by a per-broadcast script.
///
/// A probe consumes the next frame unless it is `Live`, in which case the
/// fetch that follows consumes it. Once a script runs dry the fallback
/// frame repeats.
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Frame>>>,
    fallback: Frame,
    pub probes: AtomicUsize,
    pub fetches: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(fallback: Frame) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            probes: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn script(self, broadcast_ref: &str, frames: impl IntoIterator<Item = Frame>) -> Self {
        let key = BroadcastRef::new(broadcast_ref).unwrap().as_str().to_string();
        self.scripts
            .lock()
            .insert(key, frames.into_iter().collect());
        self
    }

    fn next(&self, broadcast: &BroadcastRef, consume_live: bool) -> Frame {
        let mut scripts = self.scripts.lock();
        let Some(queue) = scripts.get_mut(broadcast.as_str()) else {
            return self.fallback.clone();
        };
        match queue.front() {
            None => self.fallback.clone(),
            Some(Frame::Live(n)) if !consume_live => Frame::Live(*n),
            Some(_) => queue.pop_front().unwrap_or_else(|| self.fallback.clone()),
        }
    }

    async fn answer<T>(&self, work: impl Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = work.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl MetadataSource for ScriptedSource {
    async fn probe(&self, broadcast: &BroadcastRef) -> std::result::Result<LiveStatus, FetchError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let frame = self.next(broadcast, false);
        self.answer(async move {
            match frame {
                Frame::Upcoming => Ok(LiveStatus::Upcoming),
                Frame::Live(_) => Ok(LiveStatus::Live),
                Frame::Offline => Ok(LiveStatus::NotLive),
                Frame::Transient => Err(FetchError::Transient("scripted outage".to_string())),
                Frame::Ended => Ok(LiveStatus::Ended),
                Frame::Hang => std::future::pending().await,
                Frame::Delay(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(LiveStatus::Upcoming)
                }
                Frame::Panic => panic!("scripted panic"),
            }
        })
        .await
    }

    async fn fetch(&self, broadcast: &BroadcastRef) -> std::result::Result<Snapshot, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let frame = self.next(broadcast, true);
        self.answer(async move {
            let snapshot = |is_live: bool, viewers: Option<i64>| Snapshot {
                is_live,
                concurrent_viewers: viewers,
                title: Some("Scripted stream".to_string()),
                channel: Some("Test Channel".to_string()),
                started_at: None,
                observed_at: Utc::now(),
            };
            match frame {
                Frame::Live(n) => Ok(snapshot(true, Some(n))),
                Frame::Upcoming | Frame::Offline => Ok(snapshot(false, None)),
                Frame::Transient => Err(FetchError::Transient("scripted outage".to_string())),
                Frame::Ended => Err(FetchError::PermanentEnd("scripted end".to_string())),
                Frame::Hang => std::future::pending().await,
                Frame::Delay(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(snapshot(false, None))
                }
                Frame::Panic => panic!("scripted panic"),
            }
        })
        .await
    }
}

/// Notifier that records every payload it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(NotifyTarget, NotificationPayload)>>,
}

impl RecordingNotifier {
    pub fn kinds_for(&self, job_id: &str) -> Vec<&'static str> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, p)| p.job().id == job_id)
            .map(|(_, p)| p.kind())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, target: &NotifyTarget, payload: &NotificationPayload) -> Result<Delivery> {
        self.sent.lock().push((target.clone(), payload.clone()));
        Ok(Delivery::Sent)
    }
}

/// Millisecond cadence so scenarios finish quickly.
pub fn fast_tracker() -> TrackerConfig {
    TrackerConfig {
        waiting_interval: Duration::from_millis(20),
        live_interval: Duration::from_millis(20),
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        failure_threshold: 2,
        poll_timeout: Duration::from_millis(500),
        max_live_duration: Duration::from_secs(3600),
    }
}

/// File-backed database in a temporary directory.
pub struct TestDb {
    pub dir: TempDir,
    pub pool: DbPool,
    pub write_pool: WritePool,
    pub store: Arc<SqlxSampleStore>,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("tracker.db").display());
        let pool = database::init_pool(&url).await.unwrap();
        database::run_migrations(&pool).await.unwrap();
        let write_pool = database::init_write_pool(&url).await.unwrap();
        let store = Arc::new(SqlxSampleStore::new(pool.clone(), write_pool.clone()));
        Self {
            dir,
            pool,
            write_pool,
            store,
        }
    }
}

/// A scheduler wired to a test database, scripted source and recording notifier.
pub struct Harness {
    pub store: Arc<SqlxSampleStore>,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(db: &TestDb, source: ScriptedSource) -> Self {
        let store = Arc::clone(&db.store);
        let source = Arc::new(source);
        let notifier = Arc::new(RecordingNotifier::default());
        let notifications = Arc::new(NotificationService::new(
            notifier.clone(),
            store.clone(),
            RetryPolicy::no_retry(),
        ));
        let scheduler = Scheduler::new(SchedulerDeps {
            store: store.clone(),
            source: source.clone(),
            notifications,
            tracker: fast_tracker(),
            analyzer: AnalyzerConfig::default(),
        });
        Self {
            store,
            source,
            notifier,
            scheduler,
        }
    }

    pub fn store(&self) -> &dyn SampleStore {
        self.store.as_ref()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(5);
