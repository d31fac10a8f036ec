//! Per-job tracking logic.
//!
//! Everything here is pure: the scheduler's job actors feed poll results in
//! and persist what comes out.

pub mod cadence;
pub mod machine;

use std::time::Duration;

use crate::{Error, Result};

pub use machine::{PollOutcome, Step, step};

/// Tuning knobs of the tracking state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Cadence while waiting for the broadcast to start.
    pub waiting_interval: Duration,
    /// Cadence right after the broadcast goes live.
    pub live_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Consecutive failed polls tolerated before a job fails.
    pub failure_threshold: u32,
    /// Upper bound for a single probe or fetch.
    pub poll_timeout: Duration,
    /// Live tracking stops after this long.
    pub max_live_duration: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            waiting_interval: Duration::from_secs(60),
            live_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(300),
            failure_threshold: 10,
            poll_timeout: Duration::from_secs(30),
            max_live_duration: Duration::from_secs(24 * 3600),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(Error::config("minimum poll interval must be positive"));
        }
        if self.min_interval > self.max_interval {
            return Err(Error::config(format!(
                "minimum poll interval ({:?}) exceeds maximum ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::config("poll timeout must be positive"));
        }
        Ok(())
    }

    /// Clamp an interval into `[min_interval, max_interval]`.
    pub fn clamp_interval(&self, interval: Duration) -> Duration {
        interval.clamp(self.min_interval, self.max_interval)
    }
}
