//! # channel-harvest
//!
//! Acquisition engine for broadcast channels: pulls messages and media from a
//! fixed set of channels, fingerprints and enriches them, and persists them as
//! zstd-compressed batches inside size-bounded, integrity-checked zip archives.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI; consumers supply a [`Config`] and a
//!   [`ContentProvider`] implementation
//! - **Sensible defaults** - Every setting except the channel list has a default
//! - **Fail per item** - A broken media file or channel never stops the run
//! - **Event-driven** - Consumers subscribe to [`Event`]s instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_harvest::{ChannelTarget, Config, Harvester, MemoryProvider, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         channels: vec![ChannelTarget {
//!             name: "CheMed123".to_string(),
//!             priority: 9,
//!             mode: "pharma".to_string(),
//!         }],
//!         ..Default::default()
//!     };
//!
//!     let harvester = Harvester::new(config, Arc::new(MemoryProvider::new()))?;
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = run_with_shutdown(&harvester).await?;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Rotating, verified zip packages
pub mod archive;
/// Configuration types
pub mod config;
/// Per-channel acquisition lifecycle
pub mod coordinator;
/// Error types
pub mod error;
/// Media download, optimization and packaging
pub mod media;
/// Run metrics and the summary report
pub mod metrics;
/// Batch buffering and compressed persistence
pub mod persist;
/// Message transformation
pub mod processor;
/// Content provider boundary
pub mod provider;
/// Retry logic with exponential backoff
pub mod retry;
/// Priority scheduling with bounded concurrency
pub mod scheduler;
/// Run lifecycle and stall detection
pub mod supervisor;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchivePackager, ArchiveReport};
pub use config::Config;
pub use coordinator::ChannelOutcome;
pub use error::{ArchiveError, Error, MediaError, ProviderError, Result};
pub use metrics::{AcquisitionMetrics, MetricsSnapshot};
pub use provider::{ContentProvider, MemoryProvider};
pub use scheduler::{ScheduleSummary, Scheduler};
pub use supervisor::{EXIT_CONFIG, EXIT_OK, EXIT_STALLED, Harvester, RunOutcome, exit_with};
pub use types::{ChannelStatus, ChannelTarget, Event, MessageRecord};

/// Run the harvester, turning termination signals into a graceful shutdown.
///
/// A signal cancels the harvester's shutdown token; in-flight channels then flush
/// their partial batch and close their archive before the run returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use channel_harvest::{Config, Harvester, MemoryProvider, exit_with, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let harvester = match Harvester::new(Config::default(), Arc::new(MemoryProvider::new())) {
///         Ok(h) => h,
///         Err(e) => exit_with(&Err(e)),
///     };
///     let result = run_with_shutdown(&harvester).await;
///     exit_with(&result);
/// }
/// ```
pub async fn run_with_shutdown(harvester: &Harvester) -> Result<RunOutcome> {
    let token = harvester.shutdown_token();
    let signal_task = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Initiating graceful shutdown");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });

    let result = harvester.run().await;
    signal_task.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
