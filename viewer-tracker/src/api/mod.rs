//! HTTP API for operators.
//!
//! JSON endpoints to create, inspect and cancel tracking jobs, a
//! server-sent event stream of job updates, health probes and runtime log
//! filter control.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
