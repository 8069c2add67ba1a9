//! Channel acquisition coordinator -- full lifecycle for a single channel.
//!
//! Phases:
//! 1. Resolve the channel (retrying transient provider failures)
//! 2. Open the channel's archive
//! 3. Stream messages oldest-first, process them and flush full batches
//! 4. Flush the final partial batch and close (verify) the archive
//!
//! The archive is closed on every path once it has been opened, including
//! processing errors and shutdown.

use crate::archive::ArchivePackager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::MediaAcquirer;
use crate::metrics::AcquisitionMetrics;
use crate::persist::{Batch, BatchPersister};
use crate::processor::MessageProcessor;
use crate::provider::{ChannelHandle, ContentProvider};
use crate::retry::with_retry;
use crate::supervisor::ActivityTracker;
use crate::types::{ChannelStatus, ChannelTarget, Event};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state handed to every channel task
#[derive(Clone)]
pub struct AcquisitionContext {
    /// Run configuration
    pub config: Arc<Config>,
    /// Remote content service
    pub provider: Arc<dyn ContentProvider>,
    /// Run-wide counters
    pub metrics: AcquisitionMetrics,
    /// Progress clock watched by the stall detector
    pub activity: ActivityTracker,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Cancelled on signal or stall
    pub shutdown: CancellationToken,
}

/// How one channel ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelOutcome {
    /// Channel name
    pub channel: String,
    /// Final status (`Completed` or `Failed`)
    pub status: ChannelStatus,
    /// Messages processed for this channel
    pub messages: u64,
    /// Failure reason for failed channels
    pub error: Option<String>,
}

impl ChannelOutcome {
    /// Whether the channel completed
    pub fn succeeded(&self) -> bool {
        self.status == ChannelStatus::Completed
    }

    pub(crate) fn failed(channel: &str, messages: u64, reason: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            status: ChannelStatus::Failed,
            messages,
            error: Some(reason.into()),
        }
    }
}

/// Acquire one channel end to end
///
/// Never returns an error: every failure is folded into a `Failed` outcome, and
/// the channel's status in the metrics is updated to match.
pub async fn run_channel(ctx: &AcquisitionContext, target: &ChannelTarget) -> ChannelOutcome {
    let name = target.name.as_str();
    let started = Instant::now();

    ctx.metrics.set_status(name, ChannelStatus::Active).await;
    ctx.event_tx
        .send(Event::ChannelStarted {
            channel: name.to_string(),
        })
        .ok();
    info!(channel = %name, priority = target.priority, mode = %target.mode, "Starting channel");

    let outcome = match resolve(ctx, name).await {
        Ok(handle) => acquire(ctx, &handle).await,
        Err(e) => ChannelOutcome::failed(name, 0, failure_reason(&e)),
    };

    let elapsed = started.elapsed().as_secs_f64();
    match &outcome.error {
        None => {
            ctx.metrics.set_status(name, ChannelStatus::Completed).await;
            info!(channel = %name, messages = outcome.messages, "COMPLETED in {:.1}s", elapsed);
            ctx.event_tx
                .send(Event::ChannelCompleted {
                    channel: name.to_string(),
                    messages: outcome.messages,
                })
                .ok();
        }
        Some(reason) => {
            ctx.metrics.set_status(name, ChannelStatus::Failed).await;
            error!(channel = %name, messages = outcome.messages, error = %reason, "FAILED in {:.1}s", elapsed);
            ctx.event_tx
                .send(Event::ChannelFailed {
                    channel: name.to_string(),
                    error: reason.clone(),
                })
                .ok();
        }
    }

    outcome
}

async fn resolve(ctx: &AcquisitionContext, name: &str) -> Result<ChannelHandle> {
    let provider = ctx.provider.as_ref();
    tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => Err(Error::ShuttingDown),
        result = with_retry(&ctx.config.resolve_retry, || provider.resolve_channel(name)) => {
            result.map_err(|e| {
                if e.is_terminal() {
                    warn!(channel = %name, error = %e, "Channel cannot be acquired");
                }
                Error::Provider(e)
            })
        }
    }
}

async fn acquire(ctx: &AcquisitionContext, handle: &ChannelHandle) -> ChannelOutcome {
    let name = handle.name.as_str();
    let config = &ctx.config;

    let mut packager = ArchivePackager::new(&config.storage.archive_dir, name, config.archive.clone())
        .with_events(ctx.event_tx.clone());
    if let Err(e) = packager.open().await {
        return ChannelOutcome::failed(name, 0, format!("failed to open archive: {}", e));
    }

    let mut persister = BatchPersister::new(&config.storage.raw_dir, name, config.persist.zstd_level)
        .with_events(ctx.event_tx.clone());
    let media = MediaAcquirer::new(
        ctx.provider.clone(),
        &config.storage.media_dir,
        config.media.clone(),
        ctx.metrics.clone(),
        ctx.shutdown.clone(),
    )
    .with_events(ctx.event_tx.clone());
    let processor = MessageProcessor::new(media, ctx.metrics.clone());
    let mut batch = Batch::new(name, config.acquisition.chunk_size);
    let mut messages = 0u64;

    let streamed = stream_channel(
        ctx,
        handle,
        &processor,
        &mut persister,
        &mut packager,
        &mut batch,
        &mut messages,
    )
    .await;

    // Whatever happened, keep what was already processed
    let remaining = batch.take();
    let final_flush = persister.flush(remaining, &mut packager).await;
    if let Ok(Some(_)) = &final_flush {
        ctx.activity.touch();
    }

    if let Some(report) = packager.close().await
        && !report.verified
    {
        warn!(channel = %name, archive = ?report.path, "Channel archive was discarded");
    }

    match (streamed, final_flush) {
        (Ok(()), Ok(_)) => ChannelOutcome {
            channel: name.to_string(),
            status: ChannelStatus::Completed,
            messages,
            error: None,
        },
        (Ok(()), Err(e)) => ChannelOutcome::failed(name, messages, format!("final flush failed: {}", e)),
        (Err(e), flush) => {
            if let Err(flush_err) = flush {
                error!(channel = %name, error = %flush_err, "Failed to flush partial batch");
            }
            ChannelOutcome::failed(name, messages, failure_reason(&e))
        }
    }
}

async fn stream_channel(
    ctx: &AcquisitionContext,
    handle: &ChannelHandle,
    processor: &MessageProcessor,
    persister: &mut BatchPersister,
    packager: &mut ArchivePackager,
    batch: &mut Batch,
    messages: &mut u64,
) -> Result<()> {
    let name = handle.name.as_str();
    let mut stream = ctx.provider.stream_messages(handle);

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                info!(channel = %name, messages = *messages, "Shutdown requested, stopping channel");
                return Err(Error::ShuttingDown);
            }
            item = stream.next() => item,
        };

        let Some(item) = next else {
            debug!(channel = %name, messages = *messages, "Message stream exhausted");
            return Ok(());
        };

        let raw = item?;
        let record = processor.process(&raw, name, packager).await?;
        batch.push(record);
        *messages += 1;

        if batch.is_full() {
            persister.flush(batch.take(), packager).await?;
            ctx.activity.touch();
        }
    }
}

fn failure_reason(e: &Error) -> String {
    match e {
        Error::ShuttingDown => "interrupted".to_string(),
        other => other.to_string(),
    }
}
