//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("An active tracking job already exists for {broadcast_ref} (job {job_id})")]
    DuplicateJob {
        broadcast_ref: String,
        job_id: String,
    },

    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Broadcast has permanently ended: {0}")]
    PermanentEnd(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Job actor stopped: {0}")]
    ActorStopped(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate_job(broadcast_ref: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self::DuplicateJob {
            broadcast_ref: broadcast_ref.into(),
            job_id: job_id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Wrap a failed write so callers can tell it apart from read failures.
    pub fn store_write(err: impl std::fmt::Display) -> Self {
        Self::StoreWrite(err.to_string())
    }
}
