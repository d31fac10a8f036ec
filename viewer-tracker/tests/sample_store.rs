mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::{STREAM_A, TARGET, TestDb};
use viewer_tracker::Error;
use viewer_tracker::analyzer::{AnalyzerConfig, analyze};
use viewer_tracker::database::repositories::SampleStore;
use viewer_tracker::domain::{BroadcastRef, JobState, NotifyTarget, Sample, TrackingJob};

fn new_job(broadcast_ref: &str) -> TrackingJob {
    TrackingJob::new(
        BroadcastRef::new(broadcast_ref).unwrap(),
        NotifyTarget::parse(TARGET).unwrap(),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_job_round_trips_through_store() {
    let db = TestDb::new().await;
    let job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    let loaded = db.store.get_job(&job.id).await.unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.broadcast_ref, job.broadcast_ref);
    assert_eq!(loaded.notify_target, job.notify_target);
    assert_eq!(loaded.state, JobState::Waiting);
    assert_eq!(loaded.poll_interval, Duration::from_secs(60));
    assert_eq!(loaded.created_at.timestamp_millis(), job.created_at.timestamp_millis());

    let active = db.store.load_active_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let db = TestDb::new().await;
    let err = db.store.get_job("missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_duplicate_active_job_rejected_with_existing_id() {
    let db = TestDb::new().await;
    let first = new_job(STREAM_A);
    db.store.create_job(&first).await.unwrap();

    let err = db.store.create_job(&new_job(STREAM_A)).await.unwrap_err();
    match err {
        Error::DuplicateJob { job_id, .. } => assert_eq!(job_id, first.id),
        other => panic!("expected DuplicateJob, got {other:?}"),
    }

    // A terminal job frees the broadcast for a new one.
    let mut done = first.clone();
    done.fail(Utc::now(), "cancelled").unwrap();
    db.store.update_job(&done).await.unwrap();
    db.store.create_job(&new_job(STREAM_A)).await.unwrap();
}

#[tokio::test]
async fn test_append_sample_updates_job_atomically() {
    let db = TestDb::new().await;
    let mut job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    let now = Utc::now();
    job.go_live(now).unwrap();
    job.last_sample_at = Some(now);
    let sample = Sample::new(&job.id, now, 1200, true);
    db.store.append_sample(&job, &sample).await.unwrap();

    let loaded = db.store.get_job(&job.id).await.unwrap();
    assert_eq!(loaded.state, JobState::Live);
    assert!(loaded.started_live_at.is_some());

    let history = db.store.list_job_history(&job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].concurrent_viewers, 1200);
}

#[tokio::test]
async fn test_samples_never_move_backwards() {
    let db = TestDb::new().await;
    let mut job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    let now = Utc::now();
    job.go_live(now).unwrap();
    db.store
        .append_sample(&job, &Sample::new(&job.id, now, 10, true))
        .await
        .unwrap();
    // Same timestamp is allowed.
    db.store
        .append_sample(&job, &Sample::new(&job.id, now, 11, true))
        .await
        .unwrap();

    let older = Sample::new(&job.id, now - TimeDelta::seconds(5), 12, true);
    let err = db.store.append_sample(&job, &older).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)));

    let history = db.store.list_job_history(&job.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(
        history
            .windows(2)
            .all(|w| w[0].observed_at <= w[1].observed_at)
    );
}

#[tokio::test]
async fn test_terminal_job_is_frozen() {
    let db = TestDb::new().await;
    let mut job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    job.fail(Utc::now(), "cancelled").unwrap();
    db.store.update_job(&job).await.unwrap();

    let mut revived = job.clone();
    revived.state = JobState::Live;
    let err = db.store.update_job(&revived).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)));

    let sample = Sample::new(&job.id, Utc::now(), 5, true);
    let err = db.store.append_sample(&job, &sample).await.unwrap_err();
    assert!(matches!(err, Error::StoreWrite(_)));

    assert_eq!(db.store.get_job(&job.id).await.unwrap().state, JobState::Failed);
    assert!(db.store.list_job_history(&job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stats_and_recent_counts() {
    let db = TestDb::new().await;
    let mut job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    let start = Utc::now();
    job.go_live(start).unwrap();
    for (i, viewers) in [100u64, 300, 200].into_iter().enumerate() {
        let at = start + TimeDelta::seconds(i as i64 * 30);
        db.store
            .append_sample(&job, &Sample::new(&job.id, at, viewers, true))
            .await
            .unwrap();
    }
    job.end(start + TimeDelta::seconds(90), "broadcast ended").unwrap();
    let last = Sample::new(&job.id, start + TimeDelta::seconds(90), 0, false);
    db.store.append_sample(&job, &last).await.unwrap();

    let stats = db.store.sample_stats(&job.id).await.unwrap();
    assert_eq!(stats.sample_count, 4);
    assert_eq!(stats.peak_viewers, Some(300));
    assert_eq!(stats.current_viewers, Some(0));

    let recent = db.store.recent_live_counts(&job.id, 2).await.unwrap();
    assert_eq!(recent, vec![300, 200]);
}

#[tokio::test]
async fn test_report_is_written_once() {
    let db = TestDb::new().await;
    let mut job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    let start = Utc::now();
    job.go_live(start).unwrap();
    let samples = vec![
        Sample::new(&job.id, start, 10, true),
        Sample::new(&job.id, start + TimeDelta::seconds(30), 20, true),
    ];
    for sample in &samples {
        db.store.append_sample(&job, sample).await.unwrap();
    }
    job.end(start + TimeDelta::seconds(60), "broadcast ended").unwrap();
    db.store.update_job(&job).await.unwrap();

    assert_eq!(db.store.list_ended_without_report().await.unwrap().len(), 1);
    assert!(db.store.get_report(&job.id).await.unwrap().is_none());

    let report = analyze(&job.id, &samples, &AnalyzerConfig::default()).unwrap();
    db.store.save_report(&report).await.unwrap();

    let mut altered = report.clone();
    altered.peak_viewers = 999;
    db.store.save_report(&altered).await.unwrap();

    let stored = db.store.get_report(&job.id).await.unwrap().unwrap();
    assert_eq!(stored, report);
    assert!(db.store.list_ended_without_report().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_notification_outcome() {
    let db = TestDb::new().await;
    let job = new_job(STREAM_A);
    db.store.create_job(&job).await.unwrap();

    db.store
        .record_notification(&job.id, Utc::now(), Some("smtp refused"))
        .await
        .unwrap();
    let loaded = db.store.get_job(&job.id).await.unwrap();
    assert!(loaded.notified_at.is_some());
    assert_eq!(loaded.notification_error.as_deref(), Some("smtp refused"));

    let err = db
        .store
        .record_notification("missing", Utc::now(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
