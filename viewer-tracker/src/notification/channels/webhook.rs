//! Webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::NotificationPayload;
use crate::{Error, Result};

/// Posts the payload as JSON to the target URL.
pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("viewer-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, url: &str, payload: &NotificationPayload) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::notification(format!("webhook request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Webhook rejected notification");
            return Err(Error::notification(format!(
                "webhook returned {status}: {body}"
            )));
        }

        debug!(kind = payload.kind(), job_id = %payload.job().id, "Webhook notification sent");
        Ok(())
    }
}
