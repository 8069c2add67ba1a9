//! Test configuration helpers

use channel_harvest::config::{RetryConfig, WatchdogConfig};
use channel_harvest::{ChannelTarget, Config};
use std::path::Path;
use std::time::Duration;

/// Build a channel target
pub fn target(name: &str, priority: i32) -> ChannelTarget {
    ChannelTarget {
        name: name.to_string(),
        priority,
        mode: "pharma".to_string(),
    }
}

/// Config rooted in `root` with fast retries, suitable for tests
pub fn test_config(root: &Path, channels: Vec<ChannelTarget>) -> Config {
    let mut config = Config {
        channels,
        ..Default::default()
    };
    config.storage.raw_dir = root.join("raw_messages");
    config.storage.media_dir = root.join("media");
    config.storage.archive_dir = root.join("archives");
    config.acquisition.chunk_size = 10;
    config.acquisition.shutdown_grace = Duration::from_secs(5);
    config.resolve_retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: true,
    };
    config.media.download_timeout = Duration::from_secs(2);
    config.media.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.watchdog = WatchdogConfig {
        poll_interval: Duration::from_millis(50),
        stall_threshold: Duration::from_secs(30),
    };
    config
}
