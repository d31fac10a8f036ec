//! Domain layer for viewer-tracker.
//!
//! Entities, value objects and the pure data carried between the tracker,
//! the analyzer and the store.

pub mod job;
pub mod report;
pub mod sample;
pub mod value_objects;

pub use job::{JobState, TrackingJob};
pub use report::{AnalysisReport, SegmentAverage, Spike, SpikeDirection};
pub use sample::Sample;
pub use value_objects::*;
