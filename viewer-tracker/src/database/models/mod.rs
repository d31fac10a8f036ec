//! Row types and their conversions to domain types.

mod job;
mod report;
mod sample;

pub use job::TrackingJobDbModel;
pub use report::AnalysisReportDbModel;
pub use sample::{SampleDbModel, SampleStats};
