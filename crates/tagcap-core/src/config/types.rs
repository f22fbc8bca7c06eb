//! Sub-configuration structs with engine defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Policy for images whose caption artifact already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipPolicy {
    /// Process every image, refining existing captions
    #[default]
    Default,

    /// Skip images whose `<name>_caption.txt` already exists
    SkipExisting,
}

/// Processing settings for the refinement loop and dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Candidates generated per attempt
    pub repeat_count: usize,

    /// Additional attempts after the first
    pub max_retries: u32,

    /// Worker pool size
    pub max_threads: usize,

    /// Stagger unit between task submissions, multiplied by repeat_count
    pub sleep_time_secs: f64,

    /// Fixed backoff after a transient failure within an attempt
    pub backoff_secs: u64,

    /// Skip policy for existing outputs
    pub policy: SkipPolicy,

    /// Whether existing captions are refined rather than skipped
    pub refine: bool,

    /// Image extensions considered when walking a directory
    pub extensions: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            repeat_count: 3,
            max_retries: 5,
            max_threads: 8,
            sleep_time_secs: 1.1,
            backoff_secs: 2,
            policy: SkipPolicy::Default,
            refine: true,
            extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "webp".to_string(),
                "gif".to_string(),
            ],
        }
    }
}

impl ProcessingConfig {
    /// Delay between two task submissions.
    pub fn stagger(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_time_secs * self.repeat_count as f64)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Credential pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// File with one API key per line; `#` comments and blanks ignored
    pub credentials_file: Option<PathBuf>,

    /// Minimum interval between two uses of the same credential
    pub cooldown_secs: f64,

    /// Ceiling on how long one acquire may wait for a cooldown
    pub acquire_timeout_secs: u64,

    /// Short-sleep step while waiting out a cooldown
    pub poll_interval_ms: u64,

    /// Extra cooldown applied after a rate-limit signal
    pub rate_limit_penalty_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            credentials_file: None,
            cooldown_secs: 2.0,
            acquire_timeout_secs: 120,
            poll_interval_ms: 25,
            rate_limit_penalty_secs: 30,
        }
    }
}

impl PoolConfig {
    pub fn pool_options(&self) -> crate::pool::PoolOptions {
        crate::pool::PoolOptions {
            cooldown: Duration::from_secs_f64(self.cooldown_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            rate_limit_penalty: Duration::from_secs(self.rate_limit_penalty_secs),
        }
    }
}

/// Remote service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API base URL
    pub endpoint: String,

    /// Model identifier appended to the endpoint
    pub model: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Optional HTTP proxy URL
    pub proxy: Option<String>,

    /// Proxy credentials as `user:password`
    pub proxy_auth: Option<String>,

    /// Longest image edge sent to the service; larger images are downscaled
    pub max_image_edge: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-pro-vision".to_string(),
            request_timeout_secs: 60,
            proxy: None,
            proxy_auth: None,
            max_image_edge: 768,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
