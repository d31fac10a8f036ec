//! Repository layer for database access.

pub mod sample_store;

pub use sample_store::{SampleStore, SqlxSampleStore};
