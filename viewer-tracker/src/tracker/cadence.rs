//! Adaptive polling cadence.

use std::time::Duration;

use super::TrackerConfig;

/// How many recent samples feed the volatility estimate.
pub const VOLATILITY_WINDOW: usize = 6;

/// Above this mean relative change the cadence tightens.
const HIGH_VOLATILITY: f64 = 0.10;

/// Below this mean relative change the cadence relaxes.
const LOW_VOLATILITY: f64 = 0.02;

const RELAX_FACTOR: f64 = 1.5;

/// Mean absolute relative change between consecutive counts.
///
/// Returns `None` with fewer than two counts.
pub fn volatility(recent: &[u64]) -> Option<f64> {
    if recent.len() < 2 {
        return None;
    }
    let total: f64 = recent
        .windows(2)
        .map(|pair| {
            let (prev, next) = (pair[0] as f64, pair[1] as f64);
            (next - prev).abs() / prev.max(1.0)
        })
        .sum();
    Some(total / (recent.len() - 1) as f64)
}

/// Next live polling interval given the current one and recent counts.
///
/// Volatile audiences are polled more often, stable ones less.
pub fn next_interval(current: Duration, recent: &[u64], config: &TrackerConfig) -> Duration {
    let next = match volatility(recent) {
        Some(v) if v > HIGH_VOLATILITY => current / 2,
        Some(v) if v < LOW_VOLATILITY => current.mul_f64(RELAX_FACTOR),
        _ => current,
    };
    config.clamp_interval(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    #[test]
    fn test_volatility_needs_two_samples() {
        assert_eq!(volatility(&[]), None);
        assert_eq!(volatility(&[100]), None);
        assert_eq!(volatility(&[100, 100]), Some(0.0));
    }

    #[test]
    fn test_volatility_treats_zero_as_one() {
        // 0 -> 5 is a relative change of 5.0, not a division by zero.
        assert_eq!(volatility(&[0, 5]), Some(5.0));
    }

    #[test]
    fn test_high_volatility_shortens_interval() {
        let next = next_interval(Duration::from_secs(60), &[100, 150, 90, 200], &config());
        assert_eq!(next, Duration::from_secs(30));
    }

    #[test]
    fn test_stable_audience_lengthens_interval() {
        let next = next_interval(Duration::from_secs(60), &[1000, 1001, 1000, 1002], &config());
        assert_eq!(next, Duration::from_secs(90));
    }

    #[test]
    fn test_moderate_change_keeps_interval() {
        let next = next_interval(Duration::from_secs(60), &[1000, 1050, 1000], &config());
        assert_eq!(next, Duration::from_secs(60));
    }

    #[test]
    fn test_interval_is_clamped() {
        let config = config();
        assert_eq!(
            next_interval(Duration::from_secs(12), &[1, 100, 1], &config),
            config.min_interval
        );
        assert_eq!(
            next_interval(Duration::from_secs(280), &[500, 500, 500], &config),
            config.max_interval
        );
    }

    #[test]
    fn test_too_few_samples_keeps_interval() {
        let next = next_interval(Duration::from_secs(30), &[42], &config());
        assert_eq!(next, Duration::from_secs(30));
    }
}
