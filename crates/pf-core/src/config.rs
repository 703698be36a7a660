use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.postflow/config.toml`.
///
/// Every tunable has a default, so a missing file yields a fully usable
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub checkback: CheckbackConfig,
    #[serde(default)]
    pub people: PeopleConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Config {
    /// Load config from `~/.postflow/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.scheduler.validate()?;
        Ok(cfg)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".postflow")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"; anything else falls back to text.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_workspace() -> String {
    "default".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "./postflow.db".into()
}

/// Planner tunables. Rates are posts per day per form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_horizon_months")]
    pub horizon_months: u32,
    #[serde(default = "default_min_short")]
    pub min_per_day_short: f64,
    #[serde(default = "default_max_short")]
    pub max_per_day_short: f64,
    #[serde(default = "default_min_long")]
    pub min_per_day_long: f64,
    #[serde(default = "default_max_long")]
    pub max_per_day_long: f64,
    #[serde(default = "default_short_max_duration")]
    pub short_max_duration_s: f64,
    #[serde(default = "default_long_min_duration")]
    pub long_min_duration_s: f64,
    #[serde(default = "default_preferred_hours")]
    pub preferred_hours: Vec<u32>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub force_reschedule: bool,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_months == 0 {
            return Err(ConfigError::Invalid("horizon_months must be at least 1".into()));
        }
        if self.min_per_day_short > self.max_per_day_short {
            return Err(ConfigError::Invalid(
                "min_per_day_short exceeds max_per_day_short".into(),
            ));
        }
        if self.min_per_day_long > self.max_per_day_long {
            return Err(ConfigError::Invalid(
                "min_per_day_long exceeds max_per_day_long".into(),
            ));
        }
        if self.preferred_hours.is_empty() {
            return Err(ConfigError::Invalid("preferred_hours must not be empty".into()));
        }
        if let Some(h) = self.preferred_hours.iter().find(|h| **h > 23) {
            return Err(ConfigError::Invalid(format!("preferred hour {} out of range", h)));
        }
        Ok(())
    }

    /// Planning window length in whole days (30-day months).
    pub fn horizon_days(&self) -> u32 {
        self.horizon_months * 30
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            horizon_months: default_horizon_months(),
            min_per_day_short: default_min_short(),
            max_per_day_short: default_max_short(),
            min_per_day_long: default_min_long(),
            max_per_day_long: default_max_long(),
            short_max_duration_s: default_short_max_duration(),
            long_min_duration_s: default_long_min_duration(),
            preferred_hours: default_preferred_hours(),
            platforms: Vec::new(),
            force_reschedule: false,
        }
    }
}

fn default_horizon_months() -> u32 {
    2
}
fn default_min_short() -> f64 {
    1.0
}
fn default_max_short() -> f64 {
    3.0
}
fn default_min_long() -> f64 {
    0.2
}
fn default_max_long() -> f64 {
    1.0
}
fn default_short_max_duration() -> f64 {
    60.0
}
fn default_long_min_duration() -> f64 {
    60.0
}
fn default_preferred_hours() -> Vec<u32> {
    vec![9, 13, 18]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_metrics_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_comments_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_target_batch_latency_ms")]
    pub target_batch_latency_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: default_lease_ttl_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
            fetch_metrics_timeout_secs: default_fetch_timeout_secs(),
            fetch_comments_timeout_secs: default_fetch_timeout_secs(),
            batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            target_batch_latency_ms: default_target_batch_latency_ms(),
        }
    }
}

fn default_lease_ttl_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    60
}
fn default_backoff_cap_secs() -> u64 {
    3600
}
fn default_publish_timeout_secs() -> u64 {
    120
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    10
}
fn default_max_batch_size() -> usize {
    50
}
fn default_target_batch_latency_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckbackConfig {
    #[serde(default = "default_checkback_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
    #[serde(default = "default_max_pull_attempts")]
    pub max_pull_attempts: u32,
}

impl Default for CheckbackConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_checkback_poll_secs(),
            grace_window_secs: default_grace_window_secs(),
            max_pull_attempts: default_max_pull_attempts(),
        }
    }
}

fn default_checkback_poll_secs() -> u64 {
    60
}
fn default_grace_window_secs() -> u64 {
    3600
}
fn default_max_pull_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeopleConfig {
    #[serde(default = "default_lens_window_days")]
    pub lens_window_days: u32,
}

impl Default for PeopleConfig {
    fn default() -> Self {
        Self {
            lens_window_days: default_lens_window_days(),
        }
    }
}

fn default_lens_window_days() -> u32 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_lens_refresh_secs")]
    pub lens_refresh_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: default_dispatch_interval_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            lens_refresh_interval_secs: default_lens_refresh_secs(),
            workers: default_workers(),
        }
    }
}

fn default_dispatch_interval_secs() -> u64 {
    5
}
fn default_reaper_interval_secs() -> u64 {
    60
}
fn default_lens_refresh_secs() -> u64 {
    3600
}
fn default_workers() -> usize {
    4
}
