//! Detached, retried notification delivery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::channels::{
    ChannelNotifier, EmailChannel, NotificationChannel, SmtpConfig, WebhookChannel,
};
use super::{Delivery, NotificationPayload, Notifier};
use crate::Result;
use crate::database::repositories::SampleStore;
use crate::domain::RetryPolicy;

/// Notification settings.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// SMTP settings; email targets are skipped without them.
    pub smtp: Option<SmtpConfig>,
    pub retry_policy: RetryPolicy,
    pub webhook_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            retry_policy: RetryPolicy::default(),
            webhook_timeout: Duration::from_secs(15),
        }
    }
}

/// Runs deliveries off the tracking path.
///
/// Each payload is delivered on its own task with bounded exponential
/// backoff. The final outcome is written to the job's notification columns;
/// delivery failures never touch the job state.
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn SampleStore>,
    retry_policy: RetryPolicy,
    /// Job id -> current attempt, for deliveries still running.
    in_flight: Arc<DashMap<String, u32>>,
    tasks: TaskTracker,
    cancellation_token: CancellationToken,
}

impl NotificationService {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn SampleStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            notifier,
            store,
            retry_policy,
            in_flight: Arc::new(DashMap::new()),
            tasks: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Build the service with the SMTP and webhook channels.
    pub fn from_config(config: &NotificationConfig, store: Arc<dyn SampleStore>) -> Result<Self> {
        let email = EmailChannel::new(config.smtp.as_ref())?;
        if !email.is_enabled() {
            info!("SMTP is not configured; email notifications will be skipped");
        }
        let webhook = WebhookChannel::new(config.webhook_timeout)?;
        let notifier = Arc::new(ChannelNotifier::new(email, webhook));
        Ok(Self::new(notifier, store, config.retry_policy.clone()))
    }

    /// Queue `payload` for delivery. Returns `false` when a delivery for the
    /// same job is already running.
    pub fn dispatch(&self, payload: NotificationPayload) -> bool {
        let job_id = payload.job().id.clone();
        match self.in_flight.entry(job_id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %job_id, "Notification already in flight, skipping");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(0);
            }
        }

        let notifier = Arc::clone(&self.notifier);
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let policy = self.retry_policy.clone();
        let token = self.cancellation_token.clone();

        self.tasks.spawn(async move {
            Self::deliver(notifier.as_ref(), store.as_ref(), &in_flight, &policy, &token, &payload)
                .await;
            in_flight.remove(&job_id);
        });
        true
    }

    /// Number of deliveries still running.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait up to `timeout` for running deliveries, then abandon them.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(
                pending = self.pending(),
                "Notification deliveries did not finish in time, cancelling"
            );
            self.cancellation_token.cancel();
            self.tasks.wait().await;
        }
    }

    async fn deliver(
        notifier: &dyn Notifier,
        store: &dyn SampleStore,
        in_flight: &DashMap<String, u32>,
        policy: &RetryPolicy,
        token: &CancellationToken,
        payload: &NotificationPayload,
    ) {
        let job = payload.job();
        let mut attempt = 0u32;

        let outcome: Option<String> = loop {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = notifier.send(&job.notify_target, payload) => result,
            };

            match result {
                Ok(Delivery::Sent) => {
                    info!(
                        job_id = %job.id,
                        kind = payload.kind(),
                        channel = job.notify_target.channel_type(),
                        "Notification delivered"
                    );
                    break None;
                }
                Ok(Delivery::Skipped(reason)) => {
                    warn!(job_id = %job.id, reason = %reason, "Notification skipped");
                    break Some(format!("skipped: {reason}"));
                }
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    attempt += 1;
                    in_flight.insert(job.id.clone(), attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Notification failed, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(
                        job_id = %job.id,
                        attempts = attempt + 1,
                        error = %e,
                        "Notification failed permanently"
                    );
                    break Some(e.to_string());
                }
            }
        };

        if let Err(e) = store
            .record_notification(&job.id, Utc::now(), outcome.as_deref())
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to record notification outcome");
        }
    }
}
