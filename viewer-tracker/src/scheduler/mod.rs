//! Job scheduling.
//!
//! The [`Scheduler`] owns the table of running jobs. Each active job is driven
//! by its own [`actor::JobActor`] task that polls on a self-scheduled timer,
//! so polls for one job are strictly sequential while distinct jobs poll
//! concurrently.

pub mod actor;
pub mod handle;
pub mod messages;
mod service;

pub use handle::JobHandle;
pub use messages::{JobEvent, JobMessage};
pub use service::{JobReport, JobStatus, RecoverySummary, Scheduler, SchedulerDeps};
