//! Retry helper for writes that hit `SQLITE_BUSY`.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const BUSY_MAX_RETRIES: u32 = 8;
const BUSY_BASE_DELAY_MS: u64 = 10;
const BUSY_MAX_DELAY_MS: u64 = 2000;

fn is_sqlite_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err {
        // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
        let code = db_err.code().map(Cow::into_owned);
        if matches!(code.as_deref(), Some("5" | "6")) {
            return true;
        }
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Delay before retry `attempt`, with up to 25% jitter.
fn busy_delay(attempt: u32) -> Duration {
    let base = BUSY_BASE_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BUSY_MAX_DELAY_MS);
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    Duration::from_millis((base + jitter).min(BUSY_MAX_DELAY_MS))
}

/// Run `op`, retrying with jittered exponential backoff while SQLite is busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if is_sqlite_busy(&err) && attempt < BUSY_MAX_RETRIES => {
                let delay = busy_delay(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "SQLite busy, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_busy_delay_is_bounded() {
        for attempt in 0..20 {
            assert!(busy_delay(attempt) <= Duration::from_millis(BUSY_MAX_DELAY_MS));
        }
    }

    #[tokio::test]
    async fn test_non_busy_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_sqlite_busy("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::validation("nope"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_on_sqlite_busy("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::DatabaseSqlx(sqlx::Error::Protocol(
                    "database is locked".to_string(),
                )))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
