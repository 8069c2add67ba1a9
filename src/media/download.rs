//! Atomic media download
//!
//! Downloads land in a sibling `{stem}.temp{ext}` file. Only a temp file that
//! exists and meets the size threshold is renamed over the final path, so the
//! final path never holds a partial file. Every failure path (timeout, provider
//! error, validation, shutdown) removes the temp file.

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::provider::{ContentProvider, ProgressCallback, RawMedia};
use crate::retry::with_retry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Sibling temp path: `photo.jpg` -> `photo.temp.jpg`
pub fn temp_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = final_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    final_path.with_file_name(format!("{}.temp{}", stem, ext))
}

/// Download `media` to `final_path` with timeout, retry and atomic commit
///
/// Returns the committed size. Cancelling `shutdown` aborts the in-flight
/// attempt (or backoff sleep) and returns [`MediaError::Cancelled`].
pub async fn download_atomic(
    provider: &dyn ContentProvider,
    media: &RawMedia,
    final_path: &Path,
    config: &MediaConfig,
    shutdown: &CancellationToken,
) -> Result<u64, MediaError> {
    let temp = temp_path(final_path);

    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(MediaError::Cancelled),
        result = with_retry(&config.retry, || attempt(provider, media, final_path, &temp, config)) => result,
    };

    if outcome.is_err() {
        remove_if_present(&temp).await;
    }
    outcome
}

async fn attempt(
    provider: &dyn ContentProvider,
    media: &RawMedia,
    final_path: &Path,
    temp: &Path,
    config: &MediaConfig,
) -> Result<u64, MediaError> {
    // Leftover from an earlier crash or a previous attempt
    remove_if_present(temp).await;

    let progress = media
        .size
        .filter(|total| *total > 0)
        .map(|_| progress_logger(final_path));

    let result = match tokio::time::timeout(
        config.download_timeout,
        provider.download_media(media, temp, progress),
    )
    .await
    {
        Err(_) => Err(MediaError::Timeout {
            path: final_path.to_path_buf(),
            timeout: config.download_timeout,
        }),
        Ok(Err(e)) => Err(MediaError::Provider(e)),
        Ok(Ok(())) => commit(temp, final_path, config.min_file_size).await,
    };

    if result.is_err() {
        remove_if_present(temp).await;
    }
    result
}

async fn commit(temp: &Path, final_path: &Path, min_size: u64) -> Result<u64, MediaError> {
    let size = match tokio::fs::metadata(temp).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::Missing {
                path: temp.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if size <= min_size {
        return Err(MediaError::TooSmall {
            path: temp.to_path_buf(),
            size,
            min: min_size,
        });
    }

    tokio::fs::rename(temp, final_path).await?;
    debug!(path = ?final_path, size, "Committed download");
    Ok(size)
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = ?path, error = %e, "Failed to remove temp file");
    }
}

/// Log download progress at most once per second
fn progress_logger(path: &Path) -> ProgressCallback {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let last = Mutex::new(None::<Instant>);

    Arc::new(move |received: u64, total: u64| {
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        let due = last.is_none_or(|at| at.elapsed() >= PROGRESS_INTERVAL);
        if due || received >= total {
            *last = Some(Instant::now());
            let percent = if total > 0 {
                received as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            info!(file = %name, received, total, "Download progress {:.1}%", percent);
        }
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ProviderError;
    use crate::provider::{MediaKind, MemoryProvider};

    fn media(id: &str) -> RawMedia {
        RawMedia {
            id: id.to_string(),
            kind: MediaKind::Photo,
            size: Some(512),
        }
    }

    fn fast_config() -> MediaConfig {
        MediaConfig {
            download_timeout: Duration::from_millis(200),
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn temp_path_keeps_extension() {
        assert_eq!(
            temp_path(Path::new("/m/chan_abc_1700000000.jpg")),
            PathBuf::from("/m/chan_abc_1700000000.temp.jpg")
        );
    }

    #[tokio::test]
    async fn successful_download_is_committed() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new().with_media("m1", vec![1u8; 512]);
        let final_path = dir.path().join("a.jpg");

        let size = download_atomic(
            &provider,
            &media("m1"),
            &final_path,
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(size, 512);
        assert!(final_path.exists());
        assert!(!temp_path(&final_path).exists());
    }

    #[tokio::test]
    async fn too_small_download_is_rejected_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new().with_media("tiny", vec![1u8; 40]);
        let final_path = dir.path().join("tiny.jpg");

        let err = download_atomic(
            &provider,
            &media("tiny"),
            &final_path,
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MediaError::TooSmall { size: 40, .. }));
        assert!(!final_path.exists());
        assert!(!temp_path(&final_path).exists());
        // Validation failures are not retried
        assert_eq!(provider.download_calls("tiny"), 1);
    }

    #[tokio::test]
    async fn download_at_exactly_the_minimum_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config();
        let provider = MemoryProvider::new()
            .with_media("edge", vec![1u8; config.min_file_size as usize])
            .with_media("over", vec![1u8; config.min_file_size as usize + 1]);

        let edge_path = dir.path().join("edge.jpg");
        let err = download_atomic(&provider, &media("edge"), &edge_path, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TooSmall { size: 100, min: 100, .. }));
        assert!(!edge_path.exists());

        let over_path = dir.path().join("over.jpg");
        let size = download_atomic(&provider, &media("over"), &over_path, &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 101);
        assert!(over_path.exists());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new()
            .with_media("m1", vec![1u8; 512])
            .with_download_failures(
                "m1",
                vec![ProviderError::Timeout, ProviderError::Server("502".into())],
            );
        let final_path = dir.path().join("a.jpg");

        download_atomic(
            &provider,
            &media("m1"),
            &final_path,
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(provider.download_calls("m1"), 3);
        assert!(final_path.exists());
    }

    #[tokio::test]
    async fn hanging_download_times_out_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new().with_hanging_download("slow", vec![9u8; 300]);
        let final_path = dir.path().join("slow.jpg");

        let err = download_atomic(
            &provider,
            &media("slow"),
            &final_path,
            &fast_config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MediaError::Timeout { .. }));
        assert_eq!(provider.download_calls("slow"), 3);
        assert!(!final_path.exists());
        assert!(!temp_path(&final_path).exists());
    }

    #[tokio::test]
    async fn shutdown_cancels_inflight_download() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new().with_hanging_download("slow", vec![9u8; 300]);
        let final_path = dir.path().join("slow.jpg");
        let config = MediaConfig {
            download_timeout: Duration::from_secs(60),
            ..fast_config()
        };
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = download_atomic(&provider, &media("slow"), &final_path, &config, &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Cancelled));
        assert!(!final_path.exists());
        assert!(!temp_path(&final_path).exists());
    }
}
