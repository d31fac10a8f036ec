//! Process configuration loaded from the environment.
//!
//! Every setting has a default; a variable that is set but cannot be parsed
//! is a configuration error reported at startup.

use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::AnalyzerConfig;
use crate::api::server::ApiServerConfig;
use crate::domain::RetryPolicy;
use crate::notification::NotificationConfig;
use crate::notification::channels::SmtpConfig;
use crate::source::YtDlpConfig;
use crate::tracker::TrackerConfig;
use crate::{Error, Result};

/// Default database location, created on first start.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/viewer-tracker.db?mode=rwc";

/// Default directory for rotated log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Top-level configuration of the tracker process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub api: ApiServerConfig,
    pub tracker: TrackerConfig,
    pub analyzer: AnalyzerConfig,
    pub source: YtDlpConfig,
    pub notification: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let database_url = env
            .string("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let log_dir = env
            .string("LOG_DIR")
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = env.string("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        if let Some(port) = env.parse::<u16>("API_PORT")? {
            api.port = port;
        }

        let defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            waiting_interval: env
                .secs("TRACKER_WAITING_INTERVAL_SECS")?
                .unwrap_or(defaults.waiting_interval),
            live_interval: env
                .secs("TRACKER_LIVE_INTERVAL_SECS")?
                .unwrap_or(defaults.live_interval),
            min_interval: env
                .secs("TRACKER_MIN_INTERVAL_SECS")?
                .unwrap_or(defaults.min_interval),
            max_interval: env
                .secs("TRACKER_MAX_INTERVAL_SECS")?
                .unwrap_or(defaults.max_interval),
            failure_threshold: env
                .parse("TRACKER_FAILURE_THRESHOLD")?
                .unwrap_or(defaults.failure_threshold),
            poll_timeout: env
                .secs("TRACKER_POLL_TIMEOUT_SECS")?
                .unwrap_or(defaults.poll_timeout),
            max_live_duration: env
                .parse::<u64>("TRACKER_MAX_LIVE_HOURS")?
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(defaults.max_live_duration),
        };
        tracker.validate()?;

        let defaults = AnalyzerConfig::default();
        let analyzer = AnalyzerConfig {
            window: env
                .secs("ANALYZER_WINDOW_SECS")?
                .unwrap_or(defaults.window),
            spike_threshold: env
                .parse("ANALYZER_SPIKE_THRESHOLD")?
                .unwrap_or(defaults.spike_threshold),
            decline_run: env
                .parse("ANALYZER_DECLINE_RUN")?
                .unwrap_or(defaults.decline_run),
        };
        analyzer.validate()?;

        let mut source = YtDlpConfig::default();
        if let Some(path) = env.string("YTDLP_PATH") {
            source.binary_path = path;
        }
        if let Some(args) = env.string("YTDLP_EXTRA_ARGS") {
            source.extra_args = args.split_whitespace().map(str::to_string).collect();
        }

        let smtp = match env.string("SMTP_HOST") {
            Some(host) => {
                let username = env.string("SMTP_USERNAME");
                let from_address = env
                    .string("SMTP_FROM")
                    .or_else(|| username.clone())
                    .ok_or_else(|| Error::config("SMTP_FROM or SMTP_USERNAME must be set"))?;
                Some(SmtpConfig {
                    host,
                    port: env.parse("SMTP_PORT")?.unwrap_or(465),
                    username,
                    password: env.string("SMTP_PASSWORD"),
                    from_address,
                    use_starttls: env.parse("SMTP_STARTTLS")?.unwrap_or(false),
                })
            }
            None => None,
        };

        let retry_defaults = RetryPolicy::default();
        let notification = NotificationConfig {
            smtp,
            retry_policy: RetryPolicy {
                max_retries: env
                    .parse("NOTIFY_MAX_RETRIES")?
                    .unwrap_or(retry_defaults.max_retries),
                initial_delay_ms: env
                    .parse("NOTIFY_INITIAL_DELAY_MS")?
                    .unwrap_or(retry_defaults.initial_delay_ms),
                max_delay_ms: env
                    .parse("NOTIFY_MAX_DELAY_MS")?
                    .unwrap_or(retry_defaults.max_delay_ms),
                ..retry_defaults
            },
            webhook_timeout: env
                .secs("WEBHOOK_TIMEOUT_SECS")?
                .unwrap_or(NotificationConfig::default().webhook_timeout),
        };

        Ok(Self {
            database_url,
            log_dir,
            api,
            tracker,
            analyzer,
            source,
            notification,
        })
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value of `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::config(format!("invalid value '{raw}' for {key}: {e}")))
            })
            .transpose()
    }

    fn secs(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }
}
