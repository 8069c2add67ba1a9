//! Configuration types for channel-harvest

use crate::error::{Error, Result};
use crate::types::ChannelTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Output directory layout
///
/// ```text
/// {raw_dir}/{date}/{channel}.json.zst
/// {media_dir}/{channel}_{fingerprint}_{epoch}{ext}
/// {archive_dir}/{channel}_{timestamp}_{seq}.zip
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Compressed message batches (default: "./data/raw_messages")
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,

    /// Downloaded and optimized media (default: "./data/media")
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Rotating archive packages (default: "./data/archives")
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            media_dir: default_media_dir(),
            archive_dir: default_archive_dir(),
        }
    }
}

/// Channel scheduling and batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum channels processed at the same time (default: 4)
    #[serde(default = "default_max_concurrent_channels")]
    pub max_concurrent_channels: usize,

    /// Messages buffered per batch before a flush (default: 300)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// How long shutdown waits for channels to finalize their archives (default: 30 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_channels: default_max_concurrent_channels(),
            chunk_size: default_chunk_size(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Rotating archive settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Rotate before the running size would exceed this many bytes (default: 250 MiB)
    #[serde(default = "default_max_archive_size")]
    pub max_archive_size: u64,

    /// Deflate level for archive entries, 0-9 (default: 9)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_archive_size: default_max_archive_size(),
            compression_level: default_compression_level(),
        }
    }
}

/// Batch persistence settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistConfig {
    /// zstd level for message batches (default: 10)
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            zstd_level: default_zstd_level(),
        }
    }
}

/// Media download and optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// JPEG quality used when re-encoding images (default: 88)
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,

    /// Files at or below this size are treated as broken downloads (default: 100 bytes)
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,

    /// Per-file download timeout (default: 300 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Retry policy for timed-out or transient downloads (default: 2 retries, 1s then 2s)
    #[serde(default = "default_media_retry")]
    pub retry: RetryConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image_quality: default_image_quality(),
            min_file_size: default_min_file_size(),
            download_timeout: default_download_timeout(),
            retry: default_media_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 6)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1.5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Stall detection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How often the watchdog checks for progress (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Idle time after which the run is considered stalled (default: 300 seconds)
    #[serde(default = "default_stall_threshold", with = "duration_millis_serde")]
    pub stall_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            stall_threshold: default_stall_threshold(),
        }
    }
}

/// Final report formatting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Width of the summary box in columns (default: 120)
    #[serde(default = "default_report_width")]
    pub width: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            width: default_report_width(),
        }
    }
}

/// Main configuration for the harvester
///
/// Every section has working defaults; only `channels` must be supplied.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Channels to acquire, in any order (sorted by priority at run time)
    #[serde(default)]
    pub channels: Vec<ChannelTarget>,

    /// Output directories
    #[serde(default)]
    pub storage: StorageConfig,

    /// Scheduling and batching
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Archive rotation
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Batch persistence
    #[serde(default)]
    pub persist: PersistConfig,

    /// Media handling
    #[serde(default)]
    pub media: MediaConfig,

    /// Retry policy for channel resolution
    #[serde(default)]
    pub resolve_retry: RetryConfig,

    /// Stall detection
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Final report
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::config("channels", "at least one channel is required"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            let name = channel.name.trim();
            if name.is_empty() {
                return Err(Error::config("channels", "channel name must not be empty"));
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(Error::config(
                    "channels",
                    format!("channel name '{}' is not usable as a file name", channel.name),
                ));
            }
            if !seen.insert(name) {
                return Err(Error::config(
                    "channels",
                    format!("channel '{}' is listed more than once", channel.name),
                ));
            }
        }

        if self.acquisition.max_concurrent_channels == 0 {
            return Err(Error::config(
                "acquisition.max_concurrent_channels",
                "must be at least 1",
            ));
        }
        if self.acquisition.chunk_size == 0 {
            return Err(Error::config("acquisition.chunk_size", "must be at least 1"));
        }
        if self.archive.max_archive_size == 0 {
            return Err(Error::config("archive.max_archive_size", "must be positive"));
        }
        if !(0..=9).contains(&self.archive.compression_level) {
            return Err(Error::config(
                "archive.compression_level",
                "must be between 0 and 9",
            ));
        }
        if !(1..=22).contains(&self.persist.zstd_level) {
            return Err(Error::config("persist.zstd_level", "must be between 1 and 22"));
        }
        if !(1..=100).contains(&self.media.image_quality) {
            return Err(Error::config(
                "media.image_quality",
                "must be between 1 and 100",
            ));
        }
        if self.media.download_timeout.is_zero() {
            return Err(Error::config("media.download_timeout", "must be positive"));
        }
        if self.watchdog.poll_interval.is_zero() {
            return Err(Error::config("watchdog.poll_interval", "must be positive"));
        }
        if self.watchdog.stall_threshold <= self.watchdog.poll_interval {
            return Err(Error::config(
                "watchdog.stall_threshold",
                "must be longer than watchdog.poll_interval",
            ));
        }
        if self.report.width < 40 {
            return Err(Error::config("report.width", "must be at least 40 columns"));
        }

        Ok(())
    }
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("./data/raw_messages")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("./data/media")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./data/archives")
}

fn default_max_concurrent_channels() -> usize {
    4
}

fn default_chunk_size() -> usize {
    300
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_max_archive_size() -> u64 {
    250 * 1024 * 1024
}

fn default_compression_level() -> i32 {
    9
}

fn default_zstd_level() -> i32 {
    10
}

fn default_image_quality() -> u8 {
    88
}

fn default_min_file_size() -> u64 {
    100
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_media_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn default_max_attempts() -> u32 {
    6
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(1500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_stall_threshold() -> Duration {
    Duration::from_secs(300)
}

fn default_report_width() -> usize {
    120
}

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

// Backoff and watchdog timings are routinely sub-second in tests and tuned deployments
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, priority: i32) -> ChannelTarget {
        ChannelTarget {
            name: name.to_string(),
            priority,
            mode: "medical".to_string(),
        }
    }

    fn valid_config() -> Config {
        Config {
            channels: vec![target("CheMed123", 9), target("tikvahpharma", 8)],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.acquisition.max_concurrent_channels, 4);
        assert_eq!(config.acquisition.chunk_size, 300);
        assert_eq!(config.archive.max_archive_size, 250 * 1024 * 1024);
        assert_eq!(config.archive.compression_level, 9);
        assert_eq!(config.persist.zstd_level, 10);
        assert_eq!(config.media.image_quality, 88);
        assert_eq!(config.media.min_file_size, 100);
        assert_eq!(config.media.download_timeout, Duration::from_secs(300));
        assert_eq!(config.media.retry.max_attempts, 2);
        assert_eq!(config.resolve_retry.max_attempts, 6);
        assert_eq!(config.watchdog.poll_interval, Duration::from_secs(30));
        assert_eq!(config.watchdog.stall_threshold, Duration::from_secs(300));
        assert_eq!(config.report.width, 120);
    }

    #[test]
    fn minimal_json_fills_in_defaults() {
        let json = r#"{
            "channels": [
                {"name": "CheMed123", "priority": 9, "mode": "pharma"}
            ],
            "watchdog": {"stall_threshold": 60000}
        }"#;

        let config: Config = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].priority, 9);
        assert_eq!(config.watchdog.stall_threshold, Duration::from_secs(60));
        assert_eq!(config.watchdog.poll_interval, Duration::from_secs(30));
        assert_eq!(config.acquisition.chunk_size, 300);
        config.validate().unwrap();
    }

    #[test]
    fn durations_round_trip_through_json() {
        let mut config = valid_config();
        config.acquisition.shutdown_grace = Duration::from_secs(12);
        config.watchdog.poll_interval = Duration::from_millis(250);

        let json = serde_json::to_string(&config).unwrap();
        let restored: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.acquisition.shutdown_grace, Duration::from_secs(12));
        assert_eq!(restored.watchdog.poll_interval, Duration::from_millis(250));
        assert_eq!(restored.resolve_retry.initial_delay, Duration::from_millis(1500));
    }

    #[test]
    fn validate_rejects_missing_channels() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "channels"));
    }

    #[test]
    fn validate_rejects_duplicate_and_unsafe_names() {
        let mut config = valid_config();
        config.channels.push(target("CheMed123", 1));
        assert!(config.validate().is_err(), "duplicate names must be rejected");

        let mut config = valid_config();
        config.channels.push(target("../escape", 1));
        assert!(config.validate().is_err(), "path separators must be rejected");
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = valid_config();
        config.acquisition.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.acquisition.max_concurrent_channels = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.archive.max_archive_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_threshold_longer_than_poll() {
        let mut config = valid_config();
        config.watchdog.poll_interval = Duration::from_secs(30);
        config.watchdog.stall_threshold = Duration::from_secs(30);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn validate_accepts_defaults_with_channels() {
        valid_config().validate().unwrap();
    }
}
