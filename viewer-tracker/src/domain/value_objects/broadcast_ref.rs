//! Broadcast reference value object.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Matches the video id in the URL shapes YouTube uses for live broadcasts.
static YOUTUBE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:(?:www|m)\.)?(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|live/|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/].*)?$",
    )
    .expect("valid youtube url regex")
});

/// A bare YouTube video id.
static VIDEO_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"));

/// A validated, normalized reference to a broadcast.
///
/// YouTube URLs (and bare video ids) collapse to a canonical
/// `https://www.youtube.com/watch?v=<id>` form so that the same broadcast
/// cannot be tracked twice under different spellings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastRef(String);

impl BroadcastRef {
    /// Create a new BroadcastRef, validating and normalizing the input.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, Error> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(Error::validation("broadcast reference cannot be empty"));
        }
        if raw.contains(char::is_whitespace) {
            return Err(Error::validation(
                "broadcast reference cannot contain whitespace",
            ));
        }

        if VIDEO_ID_REGEX.is_match(raw) {
            return Ok(Self(canonical_youtube_url(raw)));
        }

        if let Some(caps) = YOUTUBE_URL_REGEX.captures(raw) {
            return Ok(Self(canonical_youtube_url(&caps[1])));
        }

        let parsed = url::Url::parse(raw)
            .map_err(|e| Error::validation(format!("invalid broadcast URL '{raw}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(
                "broadcast URL must start with http:// or https://",
            ));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::validation("broadcast URL must have a host"));
        }

        // `Url` already lowercases the host.
        Ok(Self(parsed.as_str().trim_end_matches('/').to_string()))
    }

    /// Create a BroadcastRef without validation (for trusted sources like DB).
    pub fn from_trusted(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The YouTube video id, if this reference points at YouTube.
    pub fn video_id(&self) -> Option<&str> {
        YOUTUBE_URL_REGEX
            .captures(&self.0)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

fn canonical_youtube_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

impl std::fmt::Display for BroadcastRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
