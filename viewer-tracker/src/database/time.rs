//! Timestamp conversions for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, Utc};

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert epoch milliseconds, clamping values chrono cannot represent.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms.is_negative() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

pub fn opt_datetime_to_ms(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(datetime_to_ms)
}

pub fn opt_ms_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(ms_to_datetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_millis() {
        let ms = 1_700_000_000_123;
        assert_eq!(datetime_to_ms(ms_to_datetime(ms)), ms);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(ms_to_datetime(i64::MIN), DateTime::<Utc>::MIN_UTC);
    }
}
