//! Process-wide acquisition counters
//!
//! [`AcquisitionMetrics`] is a cheap-to-clone handle injected into every component.
//! Counters are atomics; per-channel status lives behind an async mutex and only
//! accepts forward transitions.

pub mod report;

use crate::types::{ChannelStatus, ChannelTarget};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub use report::format_report;

struct MetricsInner {
    started: Instant,
    started_at: DateTime<Utc>,
    messages: AtomicU64,
    media: AtomicU64,
    data_volume: AtomicU64,
    compression_gain: AtomicI64,
    channels: Mutex<BTreeMap<String, ChannelStatus>>,
}

/// Shared metrics handle
#[derive(Clone)]
pub struct AcquisitionMetrics {
    inner: Arc<MetricsInner>,
}

/// Point-in-time copy of all counters
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Time since the run started
    pub elapsed: Duration,
    /// Messages processed
    pub messages: u64,
    /// Media files acquired
    pub media: u64,
    /// Bytes of media acquired
    pub data_volume: u64,
    /// Net bytes saved by image optimization
    pub compression_gain: i64,
    /// Status of every configured channel
    pub channels: BTreeMap<String, ChannelStatus>,
}

impl MetricsSnapshot {
    /// Messages per second, never dividing by less than one second
    pub fn throughput(&self) -> f64 {
        self.messages as f64 / self.elapsed.as_secs_f64().max(1.0)
    }

    /// Number of channels in `status`
    pub fn count(&self, status: ChannelStatus) -> usize {
        self.channels.values().filter(|s| **s == status).count()
    }
}

impl AcquisitionMetrics {
    /// Create metrics with every target `pending`
    pub fn new(targets: &[ChannelTarget]) -> Self {
        let channels = targets
            .iter()
            .map(|t| (t.name.clone(), ChannelStatus::Pending))
            .collect();

        Self {
            inner: Arc::new(MetricsInner {
                started: Instant::now(),
                started_at: Utc::now(),
                messages: AtomicU64::new(0),
                media: AtomicU64::new(0),
                data_volume: AtomicU64::new(0),
                compression_gain: AtomicI64::new(0),
                channels: Mutex::new(channels),
            }),
        }
    }

    /// Count one processed message
    pub fn record_message(&self) {
        self.inner.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one acquired media file of `bytes` size
    pub fn record_media(&self, bytes: u64) {
        self.inner.media.fetch_add(1, Ordering::Relaxed);
        self.inner.data_volume.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes saved (or lost, when negative) by optimization
    pub fn record_compression_gain(&self, saved: i64) {
        self.inner
            .compression_gain
            .fetch_add(saved, Ordering::Relaxed);
    }

    /// Move `channel` to `next`
    ///
    /// Returns `false` and leaves the status untouched when the transition would go
    /// backwards or skip a step.
    pub async fn set_status(&self, channel: &str, next: ChannelStatus) -> bool {
        let mut channels = self.inner.channels.lock().await;
        let current = channels
            .entry(channel.to_string())
            .or_insert(ChannelStatus::Pending);

        if current.can_transition_to(next) {
            *current = next;
            true
        } else {
            tracing::warn!(
                channel = %channel,
                from = %current,
                to = %next,
                "Ignoring invalid channel status transition"
            );
            false
        }
    }

    /// Current status of `channel`
    pub async fn status(&self, channel: &str) -> Option<ChannelStatus> {
        self.inner.channels.lock().await.get(channel).copied()
    }

    /// Messages processed so far
    pub fn messages(&self) -> u64 {
        self.inner.messages.load(Ordering::Relaxed)
    }

    /// Copy every counter
    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.inner.started_at,
            elapsed: self.inner.started.elapsed(),
            messages: self.inner.messages.load(Ordering::Relaxed),
            media: self.inner.media.load(Ordering::Relaxed),
            data_volume: self.inner.data_volume.load(Ordering::Relaxed),
            compression_gain: self.inner.compression_gain.load(Ordering::Relaxed),
            channels: self.inner.channels.lock().await.clone(),
        }
    }
}
