//! File-backed configuration for questline.
//!
//! Settings are read from `.questline/quest.toml` and layered as
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [workers]
//! max_concurrent = 4
//! queue_capacity = 1024
//!
//! [delay]
//! min_secs = 5.0
//! max_secs = 15.0
//!
//! [http]
//! timeout_secs = 30
//! retry_attempts = 3
//! rate_limit_cooldown_secs = 60
//! retry_backoff_secs = 2
//!
//! [referral]
//! cooldown_min_secs = 1200.0
//! cooldown_max_secs = 1800.0
//! pending_min_secs = 300.0
//! pending_max_secs = 900.0
//! max_pending_polls = 12
//! max_code_attempts = 20
//!
//! [api]
//! base_url = "https://quest.example.com"
//!
//! [api.endpoints]
//! sign_in = "/api/v1/sign-in"
//! consume_code = "/api/v1/invite-code/redeem"
//!
//! [input]
//! dir = "data"
//!
//! [storage]
//! db_file = "accounts.db"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "quest.toml";

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Upper bound on accounts processed at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Capacity of the update queue before producers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Jitter applied between executed steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_delay_min")]
    pub min_secs: f64,
    #[serde(default = "default_delay_max")]
    pub max_secs: f64,
}

fn default_delay_min() -> f64 {
    5.0
}

fn default_delay_max() -> f64 {
    15.0
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            min_secs: default_delay_min(),
            max_secs: default_delay_max(),
        }
    }
}

/// Per-request timeout and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Wait after a 429 before the next attempt
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,
    /// Wait after a transport error or 5xx
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_rate_limit_cooldown() -> u64 {
    60
}

fn default_retry_backoff() -> u64 {
    2
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

/// Referral code exchange timing and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Wait before a dependent account first submits its code
    #[serde(default = "default_cooldown_min")]
    pub cooldown_min_secs: f64,
    #[serde(default = "default_cooldown_max")]
    pub cooldown_max_secs: f64,
    /// Back-off between polls of a pending submission
    #[serde(default = "default_pending_min")]
    pub pending_min_secs: f64,
    #[serde(default = "default_pending_max")]
    pub pending_max_secs: f64,
    #[serde(default = "default_max_pending_polls")]
    pub max_pending_polls: u32,
    #[serde(default = "default_max_code_attempts")]
    pub max_code_attempts: u32,
}

fn default_cooldown_min() -> f64 {
    1200.0
}

fn default_cooldown_max() -> f64 {
    1800.0
}

fn default_pending_min() -> f64 {
    300.0
}

fn default_pending_max() -> f64 {
    900.0
}

fn default_max_pending_polls() -> u32 {
    12
}

fn default_max_code_attempts() -> u32 {
    20
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            cooldown_min_secs: default_cooldown_min(),
            cooldown_max_secs: default_cooldown_max(),
            pending_min_secs: default_pending_min(),
            pending_max_secs: default_pending_max(),
            max_pending_polls: default_max_pending_polls(),
            max_code_attempts: default_max_code_attempts(),
        }
    }
}

/// Endpoint paths, relative to `api.base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_sign_in")]
    pub sign_in: String,
    #[serde(default = "default_register")]
    pub register: String,
    #[serde(default = "default_follow")]
    pub follow: String,
    #[serde(default = "default_link_handle")]
    pub link_handle: String,
    #[serde(default = "default_link_oauth")]
    pub link_oauth: String,
    #[serde(default = "default_generate_code")]
    pub generate_code: String,
    #[serde(default = "default_consume_code")]
    pub consume_code: String,
}

fn default_sign_in() -> String {
    "/api/v1/sign-in".to_string()
}

fn default_register() -> String {
    "/api/v1/register".to_string()
}

fn default_follow() -> String {
    "/api/v1/follow".to_string()
}

fn default_link_handle() -> String {
    "/api/v1/link-handle".to_string()
}

fn default_link_oauth() -> String {
    "/api/v1/link-oauth".to_string()
}

fn default_generate_code() -> String {
    "/api/v1/invite-code".to_string()
}

fn default_consume_code() -> String {
    "/api/v1/invite-code/redeem".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            sign_in: default_sign_in(),
            register: default_register(),
            follow: default_follow(),
            link_handle: default_link_handle(),
            link_oauth: default_link_oauth(),
            generate_code: default_generate_code(),
            consume_code: default_consume_code(),
        }
    }
}

/// Remote service location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

/// Where the credential lists are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory holding the list files, relative to the project directory
    #[serde(default = "default_input_dir")]
    pub dir: PathBuf,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: default_input_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file name inside the data directory
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_db_file() -> String {
    "accounts.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
        }
    }
}

/// The full contents of `quest.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestToml {
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl QuestToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse quest.toml")
    }

    /// Load from `<data_dir>/quest.toml`, or defaults if the file is absent.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize quest.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `QUESTLINE_BASE_URL` and `QUESTLINE_MAX_CONCURRENT` when set.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("QUESTLINE_BASE_URL")
            && !url.trim().is_empty()
        {
            self.api.base_url = url.trim().to_string();
        }
        if let Ok(raw) = std::env::var("QUESTLINE_MAX_CONCURRENT")
            && let Ok(n) = raw.trim().parse::<usize>()
        {
            self.workers.max_concurrent = n;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.workers.max_concurrent == 0 {
            warnings.push("workers.max_concurrent is 0; it will be raised to 1".to_string());
        }
        if self.workers.queue_capacity == 0 {
            warnings.push("workers.queue_capacity is 0; it will be raised to 1".to_string());
        }
        if self.http.retry_attempts == 0 {
            warnings.push("http.retry_attempts is 0; every call gets one attempt".to_string());
        }

        let ranges = [
            ("delay", self.delay.min_secs, self.delay.max_secs),
            (
                "referral.cooldown",
                self.referral.cooldown_min_secs,
                self.referral.cooldown_max_secs,
            ),
            (
                "referral.pending",
                self.referral.pending_min_secs,
                self.referral.pending_max_secs,
            ),
        ];
        for (name, min, max) in ranges {
            if !is_valid_range(min, max) || DelayRange::from_secs(min, max).is_err() {
                warnings.push(format!(
                    "Invalid {name} range [{min}, {max}]: bounds must be non-negative and min <= max"
                ));
            }
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            warnings.push(format!(
                "api.base_url '{}' should start with http:// or https://",
                self.api.base_url
            ));
        }

        warnings
    }
}

fn is_valid_range(min: f64, max: f64) -> bool {
    min.is_finite() && max.is_finite() && min >= 0.0 && min <= max
}

fn to_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|e| anyhow::anyhow!("delay of {secs} seconds is out of range: {e}"))
}

/// A closed interval of seconds that a random delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    /// Build from seconds, clamping negatives to zero and swapping reversed bounds.
    ///
    /// Fails for infinite bounds and for bounds too large for a `Duration`.
    pub fn from_secs(min: f64, max: f64) -> Result<Self> {
        let a = to_duration(min)?;
        let b = to_duration(max)?;
        Ok(if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        })
    }

    pub fn zero() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Draw a uniform duration from the interval.
    pub fn sample(&self) -> Duration {
        use rand::Rng;
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
