//! Media acquisition
//!
//! For a message carrying media the acquirer picks a deterministic target file name,
//! skips the download when a plausible file is already present, otherwise downloads
//! atomically, re-encodes images and finally packages the file into the channel's
//! archive. Failures are per-item: the caller records the message without media.

pub mod download;
pub mod optimize;

use crate::archive::ArchivePackager;
use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::metrics::AcquisitionMetrics;
use crate::provider::{ContentProvider, MediaKind, RawMedia};
use crate::types::{Event, MediaDescriptor};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use download::download_atomic;
pub use optimize::{is_optimizable, optimize_image};

/// File extension (with dot) for a media item
///
/// Photos are always `.jpg`; documents keep their declared extension lowercased;
/// everything else falls back to `.dat`.
pub fn media_extension(media: &RawMedia) -> String {
    match &media.kind {
        MediaKind::Photo => ".jpg".to_string(),
        MediaKind::Document {
            file_name: Some(name),
        } => Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e))
            .unwrap_or_else(|| ".dat".to_string()),
        _ => ".dat".to_string(),
    }
}

/// Target file name: `{channel}_{fingerprint}_{epoch}{ext}`
pub fn media_filename(channel: &str, fingerprint: &str, epoch: i64, ext: &str) -> String {
    format!("{}_{}_{}{}", channel, fingerprint, epoch, ext)
}

/// Downloads, optimizes and packages media for one run
#[derive(Clone)]
pub struct MediaAcquirer {
    provider: Arc<dyn ContentProvider>,
    media_dir: PathBuf,
    config: MediaConfig,
    metrics: AcquisitionMetrics,
    shutdown: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl MediaAcquirer {
    /// Create an acquirer writing into `media_dir`
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        media_dir: impl Into<PathBuf>,
        config: MediaConfig,
        metrics: AcquisitionMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            media_dir: media_dir.into(),
            config,
            metrics,
            shutdown,
            event_tx: None,
        }
    }

    /// Publish a [`Event::MediaAcquired`] for every acquired file
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Acquire `media` for the message identified by `fingerprint`
    pub async fn acquire(
        &self,
        channel: &str,
        fingerprint: &str,
        date: Option<DateTime<Utc>>,
        media: &RawMedia,
        packager: &mut ArchivePackager,
    ) -> Result<MediaDescriptor, MediaError> {
        let ext = media_extension(media);
        let epoch = date.unwrap_or_else(Utc::now).timestamp();
        let filename = media_filename(channel, fingerprint, epoch, &ext);
        let final_path = self.media_dir.join(&filename);

        let mut optimized = false;
        let mut bytes_saved = 0i64;

        let size = match existing_size(&final_path).await {
            Some(size) if size > self.config.min_file_size => {
                debug!(channel = %channel, file = %filename, size, "Media already present, skipping download");
                size
            }
            _ => {
                let downloaded = download_atomic(
                    self.provider.as_ref(),
                    media,
                    &final_path,
                    &self.config,
                    &self.shutdown,
                )
                .await?;

                if is_optimizable(&ext) {
                    match self.optimize(&final_path).await {
                        Ok(saved) => {
                            optimized = true;
                            bytes_saved = saved;
                            self.metrics.record_compression_gain(saved);
                            debug!(file = %filename, saved, "Optimized image");
                        }
                        Err(e) => {
                            warn!(channel = %channel, file = %filename, error = %e, "Image optimization failed, keeping original");
                        }
                    }
                }

                existing_size(&final_path).await.unwrap_or(downloaded)
            }
        };

        self.metrics.record_media(size);
        info!(channel = %channel, file = %filename, size, kind = %media.kind.label(), "Acquired media");
        if let Some(tx) = &self.event_tx {
            tx.send(Event::MediaAcquired {
                channel: channel.to_string(),
                path: final_path.clone(),
                size,
            })
            .ok();
        }

        let package = match packager.try_add(&final_path, &filename).await {
            Ok(archive) => archive.file_name().map(|n| n.to_string_lossy().to_string()),
            Err(e) => {
                warn!(channel = %channel, file = %filename, error = %e, "Failed to package media");
                None
            }
        };

        Ok(MediaDescriptor {
            path: filename,
            kind: media.kind.label().to_string(),
            size,
            optimized,
            bytes_saved,
            packaged: package.is_some(),
            package,
        })
    }

    async fn optimize(&self, path: &Path) -> Result<i64, MediaError> {
        let path = path.to_path_buf();
        let quality = self.config.image_quality;
        tokio::task::spawn_blocking(move || optimize_image(&path, quality))
            .await
            .map_err(|e| MediaError::Io(std::io::Error::other(format!("optimizer task failed: {}", e))))?
    }
}

async fn existing_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
