//! Run lifecycle: startup, stall supervision and graceful shutdown
//!
//! [`Harvester`] owns one acquisition run. Signals (via
//! [`run_with_shutdown`](crate::run_with_shutdown)) and the stall watchdog both
//! cancel the same shutdown token. Once cancelled, coordinators get
//! `acquisition.shutdown_grace` to flush and close their archives before the
//! remaining tasks are dropped.

mod watchdog;

pub use watchdog::{ActivityTracker, Watchdog};

use crate::config::Config;
use crate::coordinator::AcquisitionContext;
use crate::error::{Error, Result};
use crate::metrics::{AcquisitionMetrics, format_report};
use crate::provider::ContentProvider;
use crate::scheduler::{ScheduleSummary, Scheduler};
use crate::types::{ChannelStatus, Event};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for a run that finished or was interrupted by a signal
pub const EXIT_OK: i32 = 0;
/// Exit code for startup failures other than configuration errors
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for invalid configuration
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for a run stopped by the stall watchdog
pub const EXIT_STALLED: i32 = 3;

/// Buffer size for the event broadcast channel
const EVENT_CHANNEL_BUFFER: usize = 1000;

/// Failure reason for channels still running when the grace period ends
const ABANDONED_REASON: &str = "abandoned after shutdown grace period";

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every admitted channel settled without a shutdown request
    Completed,
    /// A signal (or caller) requested shutdown
    Interrupted,
    /// The watchdog saw no progress for longer than the stall threshold
    Stalled,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Completed | RunOutcome::Interrupted => EXIT_OK,
            RunOutcome::Stalled => EXIT_STALLED,
        }
    }
}

/// Process exit code for a failed startup
pub fn exit_code_for_error(error: &Error) -> i32 {
    match error {
        Error::Config { .. } => EXIT_CONFIG,
        _ => EXIT_FAILURE,
    }
}

/// Terminate the process with the code for `result`
pub fn exit_with(result: &Result<RunOutcome>) -> ! {
    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => exit_code_for_error(e),
    };
    std::process::exit(code)
}

/// One acquisition run over the configured channels
pub struct Harvester {
    config: Arc<Config>,
    provider: Arc<dyn ContentProvider>,
    metrics: AcquisitionMetrics,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl Harvester {
    /// Validate `config` and build a harvester around `provider`
    pub fn new(config: Config, provider: Arc<dyn ContentProvider>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_BUFFER);

        Ok(Self {
            metrics: AcquisitionMetrics::new(&config.channels),
            config: Arc::new(config),
            provider,
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a graceful shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run-wide metrics
    pub fn metrics(&self) -> &AcquisitionMetrics {
        &self.metrics
    }

    /// Run configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Render the summary report for the current metrics
    pub async fn report(&self) -> String {
        format_report(&self.metrics.snapshot().await, self.config.report.width)
    }

    /// Create the output directories
    pub async fn prepare_directories(&self) -> Result<()> {
        let storage = &self.config.storage;
        for dir in [&storage.raw_dir, &storage.media_dir, &storage.archive_dir] {
            create_private_dir(dir).await?;
        }
        Ok(())
    }

    /// Acquire every configured channel
    ///
    /// Returns once all admitted channels settled (or the shutdown grace period
    /// ran out). The provider is disconnected and the report logged on every path.
    pub async fn run(&self) -> Result<RunOutcome> {
        if let Err(e) = self.prepare_directories().await {
            self.provider.disconnect().await;
            return Err(e);
        }

        let activity = ActivityTracker::new();
        let watchdog = Watchdog::new(
            activity.clone(),
            self.config.watchdog.clone(),
            self.shutdown.clone(),
        )
        .with_events(self.event_tx.clone());
        let stalled = watchdog.stalled_flag();
        let watchdog_cancel = CancellationToken::new();
        let watchdog_handle = tokio::spawn(watchdog.run(watchdog_cancel.clone()));

        let ctx = AcquisitionContext {
            config: self.config.clone(),
            provider: self.provider.clone(),
            metrics: self.metrics.clone(),
            activity,
            event_tx: self.event_tx.clone(),
            shutdown: self.shutdown.clone(),
        };
        let scheduler = Scheduler::new(ctx);

        info!(
            channels = self.config.channels.len(),
            max_concurrent = self.config.acquisition.max_concurrent_channels,
            "Starting acquisition run"
        );

        let summary = self.supervise(&scheduler).await;

        watchdog_cancel.cancel();
        if let Err(e) = watchdog_handle.await {
            warn!(error = %e, "Watchdog task ended abnormally");
        }
        self.provider.disconnect().await;

        let outcome = if stalled.load(Ordering::SeqCst) {
            RunOutcome::Stalled
        } else if self.shutdown.is_cancelled() {
            RunOutcome::Interrupted
        } else {
            RunOutcome::Completed
        };

        if let Some(summary) = &summary
            && summary.not_started() > 0
        {
            info!(pending = summary.not_started(), "Channels left pending");
        }
        let report = self.report().await;
        info!(outcome = ?outcome, "Acquisition run finished\n{}", report);
        self.event_tx.send(Event::Shutdown).ok();

        Ok(outcome)
    }

    async fn supervise(&self, scheduler: &Scheduler) -> Option<ScheduleSummary> {
        let run = scheduler.run(&self.config.channels);
        tokio::pin!(run);

        tokio::select! {
            summary = &mut run => Some(summary),
            _ = self.shutdown.cancelled() => {
                let grace = self.config.acquisition.shutdown_grace;
                info!(grace_secs = grace.as_secs(), "Shutdown requested, waiting for channels to finalize");
                match tokio::time::timeout(grace, &mut run).await {
                    Ok(summary) => Some(summary),
                    Err(_) => {
                        let abandoned = self.abandon_unsettled().await;
                        warn!(
                            abandoned = ?abandoned,
                            "Timeout waiting for channels to finalize, abandoning remaining tasks"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Mark every channel still `active` as failed
    ///
    /// Used when the grace period runs out and the remaining channel tasks are
    /// dropped; their archives are left unverified on disk.
    async fn abandon_unsettled(&self) -> Vec<String> {
        let snapshot = self.metrics.snapshot().await;
        let mut abandoned = Vec::new();
        for (channel, status) in snapshot.channels {
            if status != ChannelStatus::Active {
                continue;
            }
            if self.metrics.set_status(&channel, ChannelStatus::Failed).await {
                error!(channel = %channel, "Channel abandoned after shutdown grace period");
                self.event_tx
                    .send(Event::ChannelFailed {
                        channel: channel.clone(),
                        error: ABANDONED_REASON.to_string(),
                    })
                    .ok();
                abandoned.push(channel);
            }
        }
        abandoned
    }
}

async fn create_private_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create {}: {}", dir.display(), e),
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750)).await?;
    }

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchdogConfig;
    use crate::provider::{MemoryProvider, RawMessage};
    use crate::types::{ChannelStatus, ChannelTarget};
    use std::time::Duration;

    fn config(dir: &Path, names: &[&str]) -> Config {
        let mut config = Config {
            channels: names
                .iter()
                .map(|n| ChannelTarget {
                    name: n.to_string(),
                    priority: 1,
                    mode: String::new(),
                })
                .collect(),
            ..Default::default()
        };
        config.storage.raw_dir = dir.join("raw");
        config.storage.media_dir = dir.join("media");
        config.storage.archive_dir = dir.join("archives");
        config.acquisition.shutdown_grace = Duration::from_secs(5);
        config
    }

    fn messages(count: i64) -> Vec<RawMessage> {
        (1..=count)
            .map(|id| RawMessage {
                id,
                text: Some(format!("m{id}")),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(RunOutcome::Interrupted.exit_code(), 0);
        assert_eq!(RunOutcome::Stalled.exit_code(), 3);
        assert_eq!(exit_code_for_error(&Error::config("channels", "empty")), 2);
        assert_eq!(exit_code_for_error(&Error::Other("boom".into())), 1);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let err = Harvester::new(Config::default(), Arc::new(MemoryProvider::new()))
            .err()
            .unwrap();
        assert_eq!(exit_code_for_error(&err), EXIT_CONFIG);
    }

    #[tokio::test]
    async fn completed_run_disconnects_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MemoryProvider::new().with_channel("news", messages(3)));
        let harvester = Harvester::new(config(dir.path(), &["news"]), provider.clone()).unwrap();
        let mut events = harvester.subscribe();

        let outcome = harvester.run().await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(!provider.is_connected());
        assert_eq!(
            harvester.metrics().status("news").await,
            Some(ChannelStatus::Completed)
        );

        let mut saw_shutdown = false;
        while let Ok(event) = events.try_recv() {
            saw_shutdown |= matches!(event, Event::Shutdown);
        }
        assert!(saw_shutdown);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directories_are_created_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(
            config(dir.path(), &["news"]),
            Arc::new(MemoryProvider::new()),
        )
        .unwrap();
        harvester.prepare_directories().await.unwrap();

        let mode = std::fs::metadata(dir.path().join("archives"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[tokio::test]
    async fn stall_stops_run_with_exit_code_three() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            MemoryProvider::new()
                .with_channel("stuck", messages(2))
                .with_hanging_stream("stuck"),
        );
        let mut config = config(dir.path(), &["stuck"]);
        config.watchdog = WatchdogConfig {
            poll_interval: Duration::from_millis(20),
            stall_threshold: Duration::from_millis(100),
        };
        let harvester = Harvester::new(config, provider.clone()).unwrap();
        let mut events = harvester.subscribe();

        let outcome = tokio::time::timeout(Duration::from_secs(10), harvester.run())
            .await
            .expect("run must end after a stall")
            .unwrap();

        assert_eq!(outcome, RunOutcome::Stalled);
        assert_eq!(outcome.exit_code(), EXIT_STALLED);
        assert!(!provider.is_connected());
        assert_eq!(
            harvester.metrics().status("stuck").await,
            Some(ChannelStatus::Failed)
        );

        let mut stalls = 0;
        let mut verified = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::StallDetected { .. } => stalls += 1,
                Event::ArchiveVerified { .. } => verified += 1,
                _ => {}
            }
        }
        assert_eq!(stalls, 1);
        assert_eq!(verified, 1, "interrupted channel must still close its archive");
    }

    #[tokio::test]
    async fn requested_shutdown_is_an_interrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            MemoryProvider::new()
                .with_channel("slow", messages(50))
                .with_message_delay("slow", Duration::from_millis(20))
                .with_channel("waiting", messages(1)),
        );
        let mut config = config(dir.path(), &["slow", "waiting"]);
        config.channels[0].priority = 10;
        config.acquisition.max_concurrent_channels = 1;
        let harvester = Harvester::new(config, provider).unwrap();

        let token = harvester.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let outcome = harvester.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(outcome.exit_code(), EXIT_OK);
        assert_eq!(
            harvester.metrics().status("slow").await,
            Some(ChannelStatus::Failed)
        );
        assert_eq!(
            harvester.metrics().status("waiting").await,
            Some(ChannelStatus::Pending)
        );

        let archives: Vec<_> = std::fs::read_dir(dir.path().join("archives"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(archives.len(), 1);
        crate::archive::verify_archive(&archives[0]).unwrap();
    }

    #[tokio::test]
    async fn channels_still_active_after_grace_are_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let harvester = Harvester::new(
            config(dir.path(), &["stuck", "done", "waiting"]),
            Arc::new(MemoryProvider::new()),
        )
        .unwrap();
        let mut events = harvester.subscribe();
        let metrics = harvester.metrics();
        metrics.set_status("stuck", ChannelStatus::Active).await;
        metrics.set_status("done", ChannelStatus::Active).await;
        metrics.set_status("done", ChannelStatus::Completed).await;

        let abandoned = harvester.abandon_unsettled().await;

        assert_eq!(abandoned, vec!["stuck".to_string()]);
        assert_eq!(metrics.status("stuck").await, Some(ChannelStatus::Failed));
        assert_eq!(metrics.status("done").await, Some(ChannelStatus::Completed));
        assert_eq!(metrics.status("waiting").await, Some(ChannelStatus::Pending));
        assert!(harvester.report().await.contains("1 completed | 1 failed | 1 pending | 0 active"));

        match events.try_recv().unwrap() {
            Event::ChannelFailed { channel, error } => {
                assert_eq!(channel, "stuck");
                assert_eq!(error, ABANDONED_REASON);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }
}
