//! Notification channels.
//!
//! - Email (SMTP via lettre)
//! - Webhooks (HTTP POST of the JSON payload)

mod email;
mod webhook;

pub use email::{EmailChannel, SmtpConfig, render_email};
pub use webhook::WebhookChannel;

use async_trait::async_trait;

use super::{Delivery, NotificationPayload, Notifier};
use crate::Result;
use crate::domain::NotifyTarget;

/// A transport for one kind of notification target.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel_type(&self) -> &'static str;

    /// Whether the channel has what it needs to deliver anything.
    fn is_enabled(&self) -> bool;

    /// Deliver `payload` to `address`.
    async fn send(&self, address: &str, payload: &NotificationPayload) -> Result<()>;
}

/// [`Notifier`] that routes each target to its channel.
pub struct ChannelNotifier {
    email: EmailChannel,
    webhook: WebhookChannel,
}

impl ChannelNotifier {
    pub fn new(email: EmailChannel, webhook: WebhookChannel) -> Self {
        Self { email, webhook }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, target: &NotifyTarget, payload: &NotificationPayload) -> Result<Delivery> {
        let channel: &dyn NotificationChannel = match target {
            NotifyTarget::Email(_) => &self.email,
            NotifyTarget::Webhook(_) => &self.webhook,
        };
        if !channel.is_enabled() {
            return Ok(Delivery::Skipped(format!(
                "{} channel is not configured",
                channel.channel_type()
            )));
        }
        channel.send(target.as_str(), payload).await?;
        Ok(Delivery::Sent)
    }
}
