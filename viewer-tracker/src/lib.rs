//! viewer-tracker library crate.
//!
//! Tracks the concurrent viewer count of live broadcasts, analyzes the
//! collected samples once a broadcast ends and delivers the report.

pub mod analyzer;
pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod scheduler;
pub mod services;
pub mod source;
pub mod tracker;

pub use error::{Error, Result};
