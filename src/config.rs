//! Configuration types for segment-dl

use crate::error::{Error, Result};
use crate::retry::RetryClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Segment cache location
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory holding one working directory per cache key (default: "./tmp")
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

/// Download behavior (timeouts, concurrency, cache retention)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Timeout for one segment request (default: 40 seconds)
    ///
    /// The whole batch gets `segment_timeout * segment_count` as its deadline.
    #[serde(default = "default_segment_timeout", with = "duration_serde")]
    pub segment_timeout: Duration,

    /// Timeout for the manifest request (default: 10 seconds)
    #[serde(default = "default_manifest_timeout", with = "duration_serde")]
    pub manifest_timeout: Duration,

    /// Upper bound on concurrently running segment fetches (None = one task per segment)
    #[serde(default)]
    pub max_concurrent_segments: Option<usize>,

    /// Remove the working directory after a successful caller-side fallback download (default: true)
    #[serde(default = "default_true")]
    pub purge_on_success: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segment_timeout: default_segment_timeout(),
            manifest_timeout: default_manifest_timeout(),
            max_concurrent_segments: None,
            purge_on_success: true,
        }
    }
}

/// External muxer settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for ffmpeg if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Hardware acceleration passed as `-hwaccel <value>` (default: none)
    #[serde(default)]
    pub hwaccel: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
            hwaccel: None,
        }
    }
}

/// Main configuration for [`SegmentDownloader`](crate::SegmentDownloader)
///
/// Fields are grouped into sub-configs:
/// - [`cache`](CacheConfig): where working directories live
/// - [`download`](DownloadConfig): timeouts and concurrency
/// - [`tools`](ToolsConfig): ffmpeg discovery
/// - `segment_retry`: policy for individual segment requests
/// - `request_retry`: policy for whole requests in [`fallback`](crate::fallback)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Cache location
    #[serde(default)]
    pub cache: CacheConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// External muxer settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Retry policy for a single segment request
    #[serde(default = "RetryConfig::segment_default")]
    pub segment_retry: RetryConfig,

    /// Retry policy for a whole download request
    #[serde(default)]
    pub request_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            download: DownloadConfig::default(),
            tools: ToolsConfig::default(),
            segment_retry: RetryConfig::segment_default(),
            request_retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Parse a JSON configuration document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file and validate it
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Reject values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.segment_timeout.is_zero() {
            return Err(Error::config(
                "segment_timeout",
                "segment timeout must be greater than zero",
            ));
        }
        if self.download.manifest_timeout.is_zero() {
            return Err(Error::config(
                "manifest_timeout",
                "manifest timeout must be greater than zero",
            ));
        }
        if self.download.max_concurrent_segments == Some(0) {
            return Err(Error::config(
                "max_concurrent_segments",
                "concurrency cap must be at least 1 (omit it for unbounded)",
            ));
        }
        for (key, retry) in [
            ("segment_retry", &self.segment_retry),
            ("request_retry", &self.request_retry),
        ] {
            if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
                return Err(Error::config(key, "backoff_multiplier must be >= 1.0"));
            }
        }
        Ok(())
    }
}

/// Retry policy for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Failure classes this policy retries
    #[serde(default = "default_request_retry_classes")]
    pub retry_on: Vec<RetryClass>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retry_on: default_request_retry_classes(),
        }
    }
}

impl RetryConfig {
    /// Policy for single segment requests: one immediate retry, only after a
    /// secure channel failure
    pub fn segment_default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
            retry_on: vec![RetryClass::SecureChannel],
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            retry_on: Vec::new(),
            ..Self::segment_default()
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_segment_timeout() -> Duration {
    Duration::from_secs(40)
}

fn default_manifest_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_request_retry_classes() -> Vec<RetryClass> {
    vec![
        RetryClass::SecureChannel,
        RetryClass::Timeout,
        RetryClass::Connect,
        RetryClass::ServerError,
        RetryClass::BatchTimeout,
    ]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
