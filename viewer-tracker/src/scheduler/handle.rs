//! Handle to a running job actor.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::messages::JobMessage;
use crate::domain::TrackingJob;
use crate::{Error, Result};

/// Mailbox capacity per job actor. Only control messages go through it.
pub const MAILBOX_CAPACITY: usize = 16;

/// Time allowed for a mailbox send when the mailbox is full.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A cloneable handle to a job actor.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    /// Distinguishes restarts of the same job.
    pub instance: u64,
    sender: mpsc::Sender<JobMessage>,
}

impl JobHandle {
    pub fn new(
        job_id: impl Into<String>,
        instance: u64,
        sender: mpsc::Sender<JobMessage>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            instance,
            sender,
        }
    }

    /// Ask the actor to cancel the job and wait for the committed result.
    pub async fn cancel(&self) -> Result<TrackingJob> {
        let (tx, rx) = oneshot::channel();
        self.send(JobMessage::Cancel(tx)).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    async fn send(&self, msg: JobMessage) -> Result<()> {
        self.sender
            .send_timeout(msg, SEND_TIMEOUT)
            .await
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> Error {
        Error::ActorStopped(self.job_id.clone())
    }
}
