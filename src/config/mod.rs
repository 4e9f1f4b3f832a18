//! Configuration management for the harvester
//!
//! Configuration comes from an optional TOML file, with `HARVESTER_*`
//! environment variables layered on top. Every section has defaults, so a
//! partial file (or none at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::rotation::{RotationPolicy, SelectionMode};
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resource pool and state locations
    pub pool: PoolConfig,

    /// Rotation policy
    pub rotation: RotationPolicy,

    /// Harvest loop settings
    pub harvest: HarvestConfig,

    /// Remote scraping backend
    pub backend: BackendConfig,

    /// Retry of transient fetch failures on the same resource
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Resource pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool file: `.json` account registry or line list. When missing, a
    /// single resource is built from `HARVESTER_*` credentials.
    pub path: Option<PathBuf>,

    /// Rotation state file for line-list and environment pools
    pub state_file: PathBuf,

    /// Take the single-writer lock on the state file
    pub lock_state: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("proxy_account_list.json")),
            state_file: PathBuf::from("data/rotation_state.json"),
            lock_state: true,
        }
    }
}

/// Harvest loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Items to collect per run
    pub max_items: usize,

    /// Records requested per fetch
    pub batch_size: usize,

    /// Resource sessions per keyword
    pub max_sessions: usize,

    /// Fetches per session before the resource is released
    pub requests_per_session: usize,

    /// Minimum content length in characters
    pub min_post_length: usize,

    /// Maximum age of a post in seconds
    pub max_oldness_secs: u64,

    /// Probability of replacing the caller's keyword with a default one
    pub default_keyword_weight: f64,

    /// Default keywords (empty = built-in list)
    pub default_keywords: Vec<String>,

    /// Domain for records that carry none
    pub default_domain: String,

    /// Extra searches on random default keywords after the main one
    pub special_checks: usize,

    /// Item cap of each extra search
    pub special_check_items: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_items: 25,
            batch_size: 20,
            max_sessions: 3,
            requests_per_session: 5,
            min_post_length: 10,
            max_oldness_secs: 1800,
            default_keyword_weight: 0.5,
            default_keywords: Vec::new(),
            default_domain: String::from("x.com"),
            special_checks: 0,
            special_check_items: 10,
        }
    }
}

/// Remote backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; requests go to `{url}/get_tweets`
    pub url: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Minimum delay between two requests in milliseconds (0 = none)
    pub request_delay_ms: u64,

    /// User agent string
    pub user_agent: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:8000"),
            request_timeout_secs: 30,
            request_delay_ms: 2000,
            user_agent: format!("harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (when present) plus environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from `HARVESTER_*` variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        fn parsed<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            value
                .map(|v| {
                    v.trim()
                        .parse::<T>()
                        .map_err(|e| anyhow::anyhow!("Invalid value for {name}: {e}"))
                })
                .transpose()
        }

        if let Some(path) = var("HARVESTER_POOL_FILE") {
            self.pool.path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("HARVESTER_STATE_FILE") {
            self.pool.state_file = PathBuf::from(path);
        }
        if let Some(url) = var("HARVESTER_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(agent) = var("HARVESTER_USER_AGENT") {
            self.backend.user_agent = agent;
        }
        if let Some(v) = parsed("HARVESTER_REQUEST_TIMEOUT", var("HARVESTER_REQUEST_TIMEOUT"))? {
            self.backend.request_timeout_secs = v;
        }
        if let Some(v) = parsed("HARVESTER_REQUEST_DELAY_MS", var("HARVESTER_REQUEST_DELAY_MS"))? {
            self.backend.request_delay_ms = v;
        }
        if let Some(v) = parsed("HARVESTER_MAX_ITEMS", var("HARVESTER_MAX_ITEMS"))? {
            self.harvest.max_items = v;
        }
        if let Some(v) = parsed("HARVESTER_BATCH_SIZE", var("HARVESTER_BATCH_SIZE"))? {
            self.harvest.batch_size = v;
        }
        if let Some(v) = parsed("HARVESTER_MAX_USES", var("HARVESTER_MAX_USES"))? {
            self.rotation.max_uses_per_resource = v;
        }
        if let Some(v) = parsed("HARVESTER_COOLDOWN_SECS", var("HARVESTER_COOLDOWN_SECS"))? {
            self.rotation.cooldown_period_secs = v;
        }
        if let Some(v) = parsed(
            "HARVESTER_RATE_LIMIT_COOLDOWN_SECS",
            var("HARVESTER_RATE_LIMIT_COOLDOWN_SECS"),
        )? {
            self.rotation.rate_limit_cooldown_secs = v;
        }
        if let Some(mode) = var("HARVESTER_ROTATION_MODE") {
            self.rotation.mode = Some(match mode.trim() {
                "quota" => SelectionMode::Quota,
                "session_duration" => SelectionMode::SessionDuration,
                other => anyhow::bail!("Invalid value for HARVESTER_ROTATION_MODE: {other}"),
            });
        }
        if let Some(level) = var("HARVESTER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("HARVESTER_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.harvest.max_items == 0 {
            anyhow::bail!("harvest.max_items must be greater than 0");
        }

        if self.harvest.batch_size == 0 {
            anyhow::bail!("harvest.batch_size must be greater than 0");
        }

        if self.harvest.max_sessions == 0 || self.harvest.requests_per_session == 0 {
            anyhow::bail!("harvest.max_sessions and harvest.requests_per_session must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.harvest.default_keyword_weight) {
            anyhow::bail!("harvest.default_keyword_weight must be between 0 and 1");
        }

        if self.backend.url.trim().is_empty() {
            anyhow::bail!("backend.url must not be empty");
        }
        Url::parse(&self.backend.url)
            .with_context(|| format!("backend.url is not a valid URL: {}", self.backend.url))?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        self.rotation
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid rotation policy: {e}"))?;

        Ok(())
    }
}
