//! Tracking job domain module.

mod entity;
mod state;

pub use entity::{CANCELLED_REASON, TrackingJob};
pub use state::JobState;
