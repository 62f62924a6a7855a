//! Runtime configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary). Malformed values fall back to defaults with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::logging::LoggingSettings;
use crate::{Error, Result};

/// Default dispatch queue capacity per user.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 64;

/// Engine tuning shared by every user worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Idle time between poll cycles.
    pub poll_interval: Duration,
    /// Minimum gap between two sends to the gateway.
    pub send_delay: Duration,
    /// Bounds of the random pause between two dispatch queue pushes.
    pub push_jitter_min: Duration,
    pub push_jitter_max: Duration,
    /// Listings taken from the top of each result page.
    pub max_listings: usize,
    /// Dedup keys remembered per filter. At least twice `max_listings`.
    pub seen_capacity: usize,
    pub dispatch_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            send_delay: Duration::from_millis(2000),
            push_jitter_min: Duration::from_secs(5),
            push_jitter_max: Duration::from_secs(12),
            max_listings: 10,
            seen_capacity: 500,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.push_jitter_min > self.push_jitter_max {
            return Err(Error::config(format!(
                "push jitter range inverted: {:?} > {:?}",
                self.push_jitter_min, self.push_jitter_max
            )));
        }
        if self.max_listings == 0 {
            return Err(Error::config("max listings must be greater than zero"));
        }
        // A key must survive the previous page plus the current one.
        if self.seen_capacity < self.max_listings.saturating_mul(2) {
            return Err(Error::config(format!(
                "seen capacity {} must be at least twice max listings {}",
                self.seen_capacity, self.max_listings
            )));
        }
        if self.dispatch_capacity == 0 {
            return Err(Error::config("dispatch capacity must be greater than zero"));
        }
        Ok(())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Telegram bot token. Required to deliver anything.
    pub bot_token: Option<String>,
    pub data_dir: PathBuf,
    pub site_base_url: String,
    pub request_timeout: Duration,
    pub worker: WorkerConfig,
    pub log_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            data_dir: PathBuf::from("data_tasks"),
            site_base_url: classifieds_parser::DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            worker: WorkerConfig::default(),
            log_dir: Some(PathBuf::from("logs")),
            log_filter: None,
        }
    }
}

impl AppConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("BOT_TOKEN") {
            config.bot_token = Some(token.trim().to_string());
        }
        if let Some(dir) = var("CARWATCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("CARWATCH_SITE_BASE_URL") {
            config.site_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(dir) = var("CARWATCH_LOG_DIR") {
            // "-" disables the file log
            config.log_dir = (dir.trim() != "-").then(|| PathBuf::from(dir));
        }
        config.log_filter = var("CARWATCH_LOG");

        if let Some(secs) = parse_var::<u64>(&var, "CARWATCH_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        let worker = &mut config.worker;
        if let Some(secs) = parse_var::<u64>(&var, "CARWATCH_POLL_INTERVAL_SECS") {
            worker.poll_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&var, "CARWATCH_SEND_DELAY_MS") {
            worker.send_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&var, "CARWATCH_PUSH_JITTER_MIN_SECS") {
            worker.push_jitter_min = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "CARWATCH_PUSH_JITTER_MAX_SECS") {
            worker.push_jitter_max = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<usize>(&var, "CARWATCH_MAX_LISTINGS") {
            worker.max_listings = n;
        }
        if let Some(n) = parse_var::<usize>(&var, "CARWATCH_SEEN_CAPACITY") {
            worker.seen_capacity = n;
        }

        config
    }

    pub fn logging(&self) -> LoggingSettings {
        LoggingSettings {
            log_dir: self.log_dir.clone(),
            filter: self.log_filter.clone(),
        }
    }

    /// The bot token, or a configuration error if it is missing.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| Error::config("BOT_TOKEN is not set"))
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring malformed configuration value");
            None
        }
    }
}
