//! Notification target value object.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Where the final report of a job is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NotifyTarget {
    /// An email address, delivered over SMTP.
    Email(String),
    /// An http(s) endpoint receiving the payload as JSON.
    Webhook(String),
}

impl NotifyTarget {
    /// Parse a target from user input.
    ///
    /// Accepts `user@example.com`, `mailto:user@example.com` and
    /// `http(s)://...` URLs.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::validation("notify target cannot be empty"));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = url::Url::parse(raw)
                .map_err(|e| Error::validation(format!("invalid webhook URL '{raw}': {e}")))?;
            if url.host_str().is_none_or(str::is_empty) {
                return Err(Error::validation("webhook URL must have a host"));
            }
            return Ok(Self::Webhook(url.to_string()));
        }

        let address = raw.strip_prefix("mailto:").unwrap_or(raw);
        validate_email(address)?;
        Ok(Self::Email(address.to_string()))
    }

    /// Channel name used in logs.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Webhook(_) => "webhook",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Email(addr) => addr,
            Self::Webhook(url) => url,
        }
    }
}

fn validate_email(address: &str) -> Result<(), Error> {
    let invalid = || Error::validation(format!("invalid email address '{address}'"));

    if address.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = address.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

impl TryFrom<String> for NotifyTarget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NotifyTarget> for String {
    fn from(value: NotifyTarget) -> Self {
        match value {
            NotifyTarget::Email(addr) => addr,
            NotifyTarget::Webhook(url) => url,
        }
    }
}

impl std::fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
