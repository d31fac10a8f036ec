//! Durable store for tracking jobs, their samples and reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::models::{
    AnalysisReportDbModel, SampleDbModel, SampleStats, TrackingJobDbModel,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::database::{DbPool, WritePool, begin_immediate};
use crate::domain::{AnalysisReport, Sample, TrackingJob};
use crate::{Error, Result};

/// Persistence operations of the tracker.
///
/// Job updates are only accepted while the persisted row is still WAITING or
/// LIVE, so a terminal job can never be rewritten.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Insert a new job. Fails with `DuplicateJob` when an active job already
    /// tracks the same broadcast.
    async fn create_job(&self, job: &TrackingJob) -> Result<()>;
    async fn get_job(&self, job_id: &str) -> Result<TrackingJob>;
    /// All WAITING and LIVE jobs, oldest first.
    async fn load_active_jobs(&self) -> Result<Vec<TrackingJob>>;
    async fn list_recent_jobs(&self, limit: u32) -> Result<Vec<TrackingJob>>;
    /// ENDED jobs whose report was never written.
    async fn list_ended_without_report(&self) -> Result<Vec<TrackingJob>>;
    /// Append `sample` and store `job` in one transaction.
    async fn append_sample(&self, job: &TrackingJob, sample: &Sample) -> Result<()>;
    async fn update_job(&self, job: &TrackingJob) -> Result<()>;
    async fn list_job_history(&self, job_id: &str) -> Result<Vec<Sample>>;
    /// The newest `limit` live viewer counts, oldest first.
    async fn recent_live_counts(&self, job_id: &str, limit: u32) -> Result<Vec<u64>>;
    async fn sample_stats(&self, job_id: &str) -> Result<SampleStats>;
    /// Store a report. A second report for the same job is ignored.
    async fn save_report(&self, report: &AnalysisReport) -> Result<()>;
    async fn get_report(&self, job_id: &str) -> Result<Option<AnalysisReport>>;
    /// Record the outcome of delivering the final notification.
    async fn record_notification(
        &self,
        job_id: &str,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;
}

/// SQLx implementation of [`SampleStore`].
#[derive(Clone)]
pub struct SqlxSampleStore {
    pool: DbPool,
    write_pool: WritePool,
}

impl SqlxSampleStore {
    pub fn new(pool: DbPool, write_pool: WritePool) -> Self {
        Self { pool, write_pool }
    }

    async fn active_job_id_for(&self, broadcast_ref: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT id FROM tracking_jobs WHERE broadcast_ref = ? AND state IN ('WAITING', 'LIVE')",
        )
        .bind(broadcast_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

const UPDATE_ACTIVE_JOB: &str = r#"
    UPDATE tracking_jobs SET
        state = ?,
        poll_interval_ms = ?,
        consecutive_failures = ?,
        title = ?,
        channel = ?,
        failure_reason = ?,
        last_sample_at = ?,
        started_live_at = ?,
        ended_at = ?,
        updated_at = ?
    WHERE id = ? AND state IN ('WAITING', 'LIVE')
"#;

async fn update_active_job(
    conn: &mut sqlx::SqliteConnection,
    row: &TrackingJobDbModel,
) -> Result<u64> {
    let result = sqlx::query(UPDATE_ACTIVE_JOB)
        .bind(&row.state)
        .bind(row.poll_interval_ms)
        .bind(row.consecutive_failures)
        .bind(&row.title)
        .bind(&row.channel)
        .bind(&row.failure_reason)
        .bind(row.last_sample_at)
        .bind(row.started_live_at)
        .bind(row.ended_at)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Rejection for writes against a job that is gone or already terminal.
fn frozen_job(job_id: &str) -> Error {
    Error::store_write(format!("job {job_id} is not active"))
}

/// Classify errors from a failed write.
fn write_error(err: Error) -> Error {
    match err {
        Error::DatabaseSqlx(e) => Error::store_write(e),
        other => other,
    }
}

fn into_jobs(rows: Vec<TrackingJobDbModel>) -> Result<Vec<TrackingJob>> {
    rows.into_iter().map(TrackingJob::try_from).collect()
}

#[async_trait]
impl SampleStore for SqlxSampleStore {
    async fn create_job(&self, job: &TrackingJob) -> Result<()> {
        let row = TrackingJobDbModel::from(job);
        let result = retry_on_sqlite_busy("create_job", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            sqlx::query(
                r#"
                INSERT INTO tracking_jobs (
                    id, broadcast_ref, notify_target, state, poll_interval_ms,
                    consecutive_failures, title, channel, failure_reason, last_sample_at,
                    created_at, started_live_at, ended_at, notified_at, notification_error,
                    updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.id)
            .bind(&row.broadcast_ref)
            .bind(&row.notify_target)
            .bind(&row.state)
            .bind(row.poll_interval_ms)
            .bind(row.consecutive_failures)
            .bind(&row.title)
            .bind(&row.channel)
            .bind(&row.failure_reason)
            .bind(row.last_sample_at)
            .bind(row.created_at)
            .bind(row.started_live_at)
            .bind(row.ended_at)
            .bind(row.notified_at)
            .bind(&row.notification_error)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(Error::DatabaseSqlx(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                let existing = self
                    .active_job_id_for(&row.broadcast_ref)
                    .await?
                    .unwrap_or_default();
                Err(Error::duplicate_job(&row.broadcast_ref, existing))
            }
            Err(e) => Err(write_error(e)),
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<TrackingJob> {
        let row = sqlx::query_as::<_, TrackingJobDbModel>(
            "SELECT * FROM tracking_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("TrackingJob", job_id))?;
        TrackingJob::try_from(row)
    }

    async fn load_active_jobs(&self) -> Result<Vec<TrackingJob>> {
        let rows = sqlx::query_as::<_, TrackingJobDbModel>(
            "SELECT * FROM tracking_jobs WHERE state IN ('WAITING', 'LIVE') ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    async fn list_recent_jobs(&self, limit: u32) -> Result<Vec<TrackingJob>> {
        let rows = sqlx::query_as::<_, TrackingJobDbModel>(
            "SELECT * FROM tracking_jobs ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    async fn list_ended_without_report(&self) -> Result<Vec<TrackingJob>> {
        let rows = sqlx::query_as::<_, TrackingJobDbModel>(
            r#"
            SELECT j.* FROM tracking_jobs j
            LEFT JOIN analysis_reports r ON r.job_id = j.id
            WHERE j.state = 'ENDED' AND r.job_id IS NULL
            ORDER BY j.ended_at, j.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    async fn append_sample(&self, job: &TrackingJob, sample: &Sample) -> Result<()> {
        if sample.job_id != job.id {
            return Err(Error::validation(format!(
                "sample for job {} cannot be appended to job {}",
                sample.job_id, job.id
            )));
        }
        let row = TrackingJobDbModel::from(job);
        let observed_at = datetime_to_ms(sample.observed_at);
        let viewers = i64::try_from(sample.concurrent_viewers)
            .map_err(|_| Error::validation("viewer count out of range"))?;

        retry_on_sqlite_busy("append_sample", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let newest: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(observed_at) FROM viewer_samples WHERE job_id = ?",
            )
            .bind(&row.id)
            .fetch_one(&mut *tx)
            .await?;
            if let Some(newest) = newest
                && observed_at < newest
            {
                tx.rollback().await?;
                return Err(Error::store_write(format!(
                    "sample at {observed_at} is older than the newest sample ({newest}) of job {}",
                    row.id
                )));
            }

            if update_active_job(&mut tx, &row).await? == 0 {
                tx.rollback().await?;
                return Err(frozen_job(&row.id));
            }

            sqlx::query(
                "INSERT INTO viewer_samples (job_id, observed_at, concurrent_viewers, is_live) VALUES (?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(observed_at)
            .bind(viewers)
            .bind(sample.is_live)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(write_error)
    }

    async fn update_job(&self, job: &TrackingJob) -> Result<()> {
        let row = TrackingJobDbModel::from(job);
        retry_on_sqlite_busy("update_job", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            if update_active_job(&mut tx, &row).await? == 0 {
                tx.rollback().await?;
                return Err(frozen_job(&row.id));
            }
            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(write_error)
    }

    async fn list_job_history(&self, job_id: &str) -> Result<Vec<Sample>> {
        let rows = sqlx::query_as::<_, SampleDbModel>(
            "SELECT * FROM viewer_samples WHERE job_id = ? ORDER BY observed_at, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Sample::from).collect())
    }

    async fn recent_live_counts(&self, job_id: &str, limit: u32) -> Result<Vec<u64>> {
        let mut counts: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT concurrent_viewers FROM viewer_samples
            WHERE job_id = ? AND is_live = 1
            ORDER BY observed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(job_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        counts.reverse();
        Ok(counts.into_iter().map(|c| c.max(0) as u64).collect())
    }

    async fn sample_stats(&self, job_id: &str) -> Result<SampleStats> {
        let (count, peak): (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MAX(CASE WHEN is_live = 1 THEN concurrent_viewers END)
            FROM viewer_samples WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT concurrent_viewers FROM viewer_samples WHERE job_id = ? ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(SampleStats {
            sample_count: count.max(0) as u64,
            current_viewers: current.map(|c| c.max(0) as u64),
            peak_viewers: peak.map(|p| p.max(0) as u64),
        })
    }

    async fn save_report(&self, report: &AnalysisReport) -> Result<()> {
        let row = AnalysisReportDbModel::from_report(report)?;
        retry_on_sqlite_busy("save_report", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            sqlx::query(
                r#"
                INSERT INTO analysis_reports (job_id, report, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(job_id) DO NOTHING
                "#,
            )
            .bind(&row.job_id)
            .bind(&row.report)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(write_error)
    }

    async fn get_report(&self, job_id: &str) -> Result<Option<AnalysisReport>> {
        sqlx::query_as::<_, AnalysisReportDbModel>(
            "SELECT * FROM analysis_reports WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .map(AnalysisReportDbModel::into_report)
        .transpose()
    }

    async fn record_notification(
        &self,
        job_id: &str,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        let at = datetime_to_ms(at);
        let rows = retry_on_sqlite_busy("record_notification", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;
            let result = sqlx::query(
                "UPDATE tracking_jobs SET notified_at = ?, notification_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(at)
            .bind(error)
            .bind(now_ms())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(result.rows_affected())
        })
        .await
        .map_err(write_error)?;

        if rows == 0 {
            return Err(Error::not_found("TrackingJob", job_id));
        }
        Ok(())
    }
}
