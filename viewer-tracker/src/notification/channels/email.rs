//! Email notification channel using SMTP.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::NotificationChannel;
use crate::domain::{AnalysisReport, SpikeDirection, TrackingJob};
use crate::notification::NotificationPayload;
use crate::{Error, Result};

/// Spikes listed in the trend section.
const MAX_LISTED_SPIKES: usize = 5;

/// SMTP server settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    /// Upgrade a plain connection with STARTTLS instead of implicit TLS.
    pub use_starttls: bool,
}

/// Email notification channel.
pub struct EmailChannel {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
}

impl EmailChannel {
    /// Build the channel. Without SMTP settings it stays disabled.
    pub fn new(config: Option<&SmtpConfig>) -> Result<Self> {
        let Some(config) = config else {
            return Ok(Self::disabled());
        };

        let builder = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| Error::config(format!("invalid SMTP host '{}': {e}", config.host)))?
        .port(config.port);

        let builder = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| Error::config(format!("invalid SMTP sender '{}': {e}", config.from_address)))?;

        Ok(Self {
            transport: Some(builder.build()),
            from: Some(from),
        })
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            from: None,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.transport.is_some() && self.from.is_some()
    }

    async fn send(&self, address: &str, payload: &NotificationPayload) -> Result<()> {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            return Err(Error::notification("SMTP is not configured"));
        };

        let to = address
            .parse::<Mailbox>()
            .map_err(|e| Error::notification(format!("invalid recipient '{address}': {e}")))?;
        let rendered = render_email(payload);

        let message = Message::builder()
            .from(from.clone())
            .to(to)
            .subject(rendered.subject)
            .multipart(MultiPart::alternative_plain_html(rendered.text, rendered.html))
            .map_err(|e| Error::notification(format!("failed to build email: {e}")))?;

        transport
            .send(message)
            .await
            .map_err(|e| Error::notification(format!("SMTP delivery failed: {e}")))?;

        debug!(kind = payload.kind(), job_id = %payload.job().id, "Email notification sent");
        Ok(())
    }
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Render a payload into subject, HTML and plain-text bodies.
pub fn render_email(payload: &NotificationPayload) -> RenderedEmail {
    match payload {
        NotificationPayload::Report { job, report } => RenderedEmail {
            subject: format!(
                "[Live Tracker] {} - peak {} viewers",
                job.display_title(),
                report.peak_viewers
            ),
            html: report_html(job, report),
            text: report_text(job, report),
        },
        NotificationPayload::TrackingFailed { job, reason } => RenderedEmail {
            subject: format!("[Live Tracker] tracking failed: {}", job.display_title()),
            html: failure_html(job, reason),
            text: failure_text(job, reason),
        },
    }
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn fmt_clock(at: DateTime<Utc>) -> String {
    at.format("%H:%M").to_string()
}

fn fmt_delta(delta: f64) -> String {
    format!("{:+.0}%", delta * 100.0)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Trend lines shared by the HTML and text bodies.
fn trend_lines(report: &AnalysisReport) -> Vec<String> {
    let mut lines = vec![format!("Duration: {}", report.duration_display())];
    match report.decline_onset {
        Some(at) => lines.push(format!("Sustained decline from {}", fmt_clock(at))),
        None => lines.push("No sustained decline after the peak".to_string()),
    }
    for spike in report.spikes.iter().take(MAX_LISTED_SPIKES) {
        let arrow = match spike.direction {
            SpikeDirection::Up => "▲",
            SpikeDirection::Down => "▼",
        };
        lines.push(format!(
            "{arrow} {} at {} ({} → {})",
            fmt_delta(spike.delta),
            fmt_clock(spike.at),
            spike.from,
            spike.to
        ));
    }
    if report.spikes.len() > MAX_LISTED_SPIKES {
        lines.push(format!(
            "... and {} more",
            report.spikes.len() - MAX_LISTED_SPIKES
        ));
    }
    lines
}

fn report_html(job: &TrackingJob, report: &AnalysisReport) -> String {
    let max_avg = report
        .segment_averages
        .iter()
        .filter_map(|s| s.avg)
        .fold(0.0_f64, f64::max)
        .max(1.0);

    let mut bars = String::new();
    for segment in &report.segment_averages {
        let label = format!(
            "{}-{}",
            fmt_clock(segment.window_start),
            fmt_clock(segment.window_end)
        );
        let _ = match segment.avg {
            Some(avg) => write!(
                bars,
                r#"<div class="bar-row"><span class="bar-label">{label}</span><div class="bar" style="width:{:.0}%"></div><span class="bar-value">{avg:.0}</span></div>"#,
                avg / max_avg * 100.0
            ),
            None => write!(
                bars,
                r#"<div class="bar-row"><span class="bar-label">{label}</span><span class="bar-value no-data">no data</span></div>"#
            ),
        };
    }

    let trends: String = trend_lines(report)
        .iter()
        .map(|line| format!("<li>{}</li>", escape_html(line)))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; color: #222; }}
        .header {{ background-color: #c0392b; color: white; padding: 15px; border-radius: 5px; }}
        .cards {{ display: flex; gap: 10px; margin-top: 10px; }}
        .card {{ flex: 1; background: #f4f4f4; border-radius: 5px; padding: 12px; text-align: center; }}
        .card .value {{ font-size: 24px; font-weight: bold; }}
        .bar-row {{ display: flex; align-items: center; gap: 8px; margin: 4px 0; }}
        .bar-label {{ width: 100px; font-size: 12px; color: #555; }}
        .bar {{ height: 12px; background: #3498db; border-radius: 3px; }}
        .no-data {{ color: #999; font-style: italic; }}
        .footer {{ color: #666; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="header">
        <h2>{title}</h2>
        <p>{channel}</p>
    </div>
    <div class="cards">
        <div class="card"><div>Peak</div><div class="value">{peak}</div><div>at {peak_at}</div></div>
        <div class="card"><div>Average</div><div class="value">{avg:.0}</div></div>
        <div class="card"><div>Minimum</div><div class="value">{min}</div></div>
    </div>
    <h3>Viewers over time</h3>
    {bars}
    <h3>Trends</h3>
    <ul>{trends}</ul>
    <div class="footer">
        <p>Tracked from {started} to {ended} | {samples} samples | {url}</p>
    </div>
</body>
</html>"#,
        title = escape_html(job.display_title()),
        channel = escape_html(job.channel.as_deref().unwrap_or_default()),
        peak = report.peak_viewers,
        peak_at = fmt_clock(report.peak_at),
        avg = report.average_viewers,
        min = report.min_viewers,
        started = fmt_time(report.started_at),
        ended = fmt_time(report.ended_at),
        samples = report.sample_count,
        url = escape_html(job.broadcast_ref.as_str()),
    )
}

fn report_text(job: &TrackingJob, report: &AnalysisReport) -> String {
    let mut text = format!(
        "{}\n{}\n\nPeak: {} viewers at {}\nAverage: {:.0}\nMinimum: {}\n\nViewers over time:\n",
        job.display_title(),
        job.broadcast_ref,
        report.peak_viewers,
        fmt_time(report.peak_at),
        report.average_viewers,
        report.min_viewers,
    );
    for segment in &report.segment_averages {
        let value = segment
            .avg
            .map(|avg| format!("{avg:.0}"))
            .unwrap_or_else(|| "no data".to_string());
        let _ = writeln!(
            text,
            "  {}-{}  {value}",
            fmt_clock(segment.window_start),
            fmt_clock(segment.window_end)
        );
    }
    text.push_str("\nTrends:\n");
    for line in trend_lines(report) {
        let _ = writeln!(text, "  - {line}");
    }
    let _ = write!(
        text,
        "\nTracked from {} to {} ({} samples)\n",
        fmt_time(report.started_at),
        fmt_time(report.ended_at),
        report.sample_count
    );
    text
}

fn failure_html(job: &TrackingJob, reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; margin: 20px;">
    <div style="background-color: #7f8c8d; color: white; padding: 15px; border-radius: 5px;">
        <h2>Tracking failed</h2>
        <p>{title}</p>
    </div>
    <p>Reason: {reason}</p>
    <p style="color: #666; font-size: 12px;">{url} | created {created}</p>
</body>
</html>"#,
        title = escape_html(job.display_title()),
        reason = escape_html(reason),
        url = escape_html(job.broadcast_ref.as_str()),
        created = fmt_time(job.created_at),
    )
}

fn failure_text(job: &TrackingJob, reason: &str) -> String {
    format!(
        "Tracking failed: {}\n{}\n\nReason: {reason}\nCreated: {}\n",
        job.display_title(),
        job.broadcast_ref,
        fmt_time(job.created_at)
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::analyzer::{AnalyzerConfig, analyze};
    use crate::domain::{BroadcastRef, JobState, NotifyTarget, Sample};

    fn job() -> TrackingJob {
        let mut job = TrackingJob::new(
            BroadcastRef::new("dQw4w9WgXcQ").unwrap(),
            NotifyTarget::parse("ops@example.com").unwrap(),
            Duration::from_secs(30),
        );
        job.title = Some("Launch <live>".to_string());
        job.channel = Some("Space & Co".to_string());
        job
    }

    fn report(job: &TrackingJob) -> AnalysisReport {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let samples: Vec<Sample> = [10u64, 12, 11, 50, 48, 5]
            .iter()
            .enumerate()
            .map(|(i, &c)| Sample::new(&job.id, t0 + TimeDelta::minutes(i as i64 * 4), c, true))
            .collect();
        analyze(&job.id, &samples, &AnalyzerConfig::default()).unwrap()
    }

    #[test]
    fn test_report_email() {
        let job = job();
        let report = report(&job);
        let email = render_email(&NotificationPayload::report(job, report));

        assert_eq!(email.subject, "[Live Tracker] Launch <live> - peak 50 viewers");
        assert!(email.html.contains("Launch &lt;live&gt;"));
        assert!(email.html.contains("Space &amp; Co"));
        assert!(email.html.contains("+355%"));
        assert!(!email.html.contains("no data"));
        assert!(email.text.contains("Peak: 50 viewers"));
        assert!(email.text.contains("(6 samples)"));
    }

    #[test]
    fn test_failure_email() {
        let mut job = job();
        job.fail(Utc::now(), "11 consecutive poll failures").unwrap();
        assert_eq!(job.state, JobState::Failed);
        let email = render_email(&NotificationPayload::tracking_failed(job));

        assert_eq!(email.subject, "[Live Tracker] tracking failed: Launch <live>");
        assert!(email.text.contains("Reason: 11 consecutive poll failures"));
        assert!(email.html.contains("Tracking failed"));
    }

    #[test]
    fn test_spike_list_is_capped() {
        let job = job();
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let samples: Vec<Sample> = (0..12)
            .map(|i| {
                let count = if i % 2 == 0 { 10 } else { 100 };
                Sample::new(&job.id, t0 + TimeDelta::minutes(i), count, true)
            })
            .collect();
        let report = analyze(&job.id, &samples, &AnalyzerConfig::default()).unwrap();
        assert_eq!(report.spikes.len(), 11);

        let lines = trend_lines(&report);
        assert_eq!(lines.len(), 2 + MAX_LISTED_SPIKES + 1);
        assert_eq!(lines.last().unwrap(), "... and 6 more");
    }

    #[test]
    fn test_disabled_channel() {
        assert!(!EmailChannel::disabled().is_enabled());
        assert!(!EmailChannel::new(None).unwrap().is_enabled());
    }
}
