//! `yt-dlp` backed metadata source.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, LiveStatus, MetadataSource, Snapshot};
use crate::domain::BroadcastRef;

static DEFAULT_YTDLP_PATH: &str = "yt-dlp";

/// Settings for invoking the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary_path: String,
    /// Extra arguments passed before the URL (cookies, proxies, ...).
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: DEFAULT_YTDLP_PATH.to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Metadata source that shells out to `yt-dlp`.
#[derive(Debug, Clone, Default)]
pub struct YtDlpSource {
    config: YtDlpConfig,
}

impl YtDlpSource {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.config.binary_path);
        cmd.arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .args(&self.config.extra_args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, broadcast: &BroadcastRef, args: &[&str]) -> Result<String, FetchError> {
        let mut cmd = self.command();
        // `--` keeps the URL from ever being parsed as an option.
        cmd.args(args).arg("--").arg(broadcast.as_str());

        let out = cmd.output().await.map_err(|e| {
            FetchError::Transient(format!(
                "failed to spawn {}: {e}",
                self.config.binary_path
            ))
        })?;

        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if out.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        debug!(
            broadcast = %broadcast,
            status = ?out.status.code(),
            stderr = %stderr,
            "yt-dlp exited with failure"
        );
        Err(map_ytdlp_error(&stderr))
    }
}

#[async_trait]
impl MetadataSource for YtDlpSource {
    async fn probe(&self, broadcast: &BroadcastRef) -> Result<LiveStatus, FetchError> {
        match self.run(broadcast, &["--print", "live_status"]).await {
            Ok(stdout) => Ok(parse_live_status(&stdout)),
            // yt-dlp refuses to extract scheduled streams and says so on stderr.
            Err(FetchError::Transient(msg)) if is_upcoming_message(&msg) => Ok(LiveStatus::Upcoming),
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, broadcast: &BroadcastRef) -> Result<Snapshot, FetchError> {
        let observed_at = Utc::now();
        match self.run(broadcast, &["--dump-json"]).await {
            Ok(stdout) => parse_snapshot(&stdout, observed_at),
            Err(FetchError::Transient(msg)) if is_upcoming_message(&msg) => Ok(Snapshot {
                is_live: false,
                concurrent_viewers: None,
                title: None,
                channel: None,
                started_at: None,
                observed_at,
            }),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    live_status: Option<String>,
    #[serde(default)]
    concurrent_view_count: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    release_timestamp: Option<i64>,
}

fn parse_live_status(stdout: &str) -> LiveStatus {
    // Only the last line matters; earlier lines may be playlist noise.
    match stdout.lines().last().map(str::trim).unwrap_or_default() {
        "is_live" => LiveStatus::Live,
        "is_upcoming" => LiveStatus::Upcoming,
        "was_live" | "post_live" => LiveStatus::Ended,
        _ => LiveStatus::NotLive,
    }
}

fn parse_snapshot(stdout: &str, observed_at: DateTime<Utc>) -> Result<Snapshot, FetchError> {
    let line = stdout.lines().last().unwrap_or_default();
    let info: YtDlpInfo = serde_json::from_str(line)
        .map_err(|e| FetchError::Transient(format!("failed to parse yt-dlp JSON: {e}")))?;

    if let Some(status @ ("was_live" | "post_live")) = info.live_status.as_deref() {
        return Err(FetchError::PermanentEnd(format!("live_status is {status}")));
    }

    let is_live = info.live_status.as_deref() == Some("is_live") || info.is_live == Some(true);

    Ok(Snapshot {
        is_live,
        concurrent_viewers: info.concurrent_view_count,
        title: info.title,
        channel: info.channel.or(info.uploader),
        started_at: info
            .release_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        observed_at,
    })
}

fn is_upcoming_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("live event will begin")
        || lower.contains("premieres in")
        || lower.contains("is_upcoming")
}

fn map_ytdlp_error(stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("does not exist")
        || lower.contains("http error 404")
        || lower.contains("unsupported url")
    {
        return FetchError::NotFound(stderr.to_string());
    }
    if lower.contains("live stream recording is not available")
        || lower.contains("this live event has ended")
        || lower.contains("has been removed")
    {
        return FetchError::PermanentEnd(stderr.to_string());
    }
    FetchError::Transient(stderr.to_string())
}
