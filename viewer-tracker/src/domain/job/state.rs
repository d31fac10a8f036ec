//! Tracking job state machine states.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle states of a tracking job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// The broadcast has not been confirmed live yet.
    #[default]
    Waiting,
    /// The broadcast is live and being sampled.
    Live,
    /// The broadcast ended; a report exists or is being produced.
    Ended,
    /// Tracking gave up (failures, cancellation, or nothing to track).
    Failed,
}

impl JobState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Live => "LIVE",
            Self::Ended => "ENDED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(Self::Waiting),
            "LIVE" => Some(Self::Live),
            "ENDED" => Some(Self::Ended),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states are never polled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Check if this state still needs polling.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        match (self, target) {
            (Waiting, Waiting | Live | Failed) => true,
            (Live, Live | Ended | Failed) => true,
            // Terminal states are frozen.
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobState) -> Result<JobState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_str() {
        assert_eq!(JobState::parse("LIVE"), Some(JobState::Live));
        assert_eq!(JobState::parse("WAITING"), Some(JobState::Waiting));
        assert_eq!(JobState::parse("live"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Ended.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Waiting.is_active());
        assert!(JobState::Live.is_active());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(JobState::Waiting.can_transition_to(JobState::Live));
        assert!(JobState::Waiting.can_transition_to(JobState::Failed));
        assert!(JobState::Live.can_transition_to(JobState::Ended));
        assert!(JobState::Live.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!JobState::Waiting.can_transition_to(JobState::Ended));
        assert!(!JobState::Live.can_transition_to(JobState::Waiting));
        assert!(!JobState::Ended.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_transition_to_error() {
        let result = JobState::Ended.transition_to(JobState::Live);
        assert!(matches!(result, Err(Error::InvalidStateTransition { .. })));
    }
}
