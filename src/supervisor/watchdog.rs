//! Stall detection

use crate::config::WatchdogConfig;
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Monotonic "last progress" clock shared by coordinators and the watchdog
#[derive(Clone, Debug)]
pub struct ActivityTracker {
    origin: Instant,
    last_millis: Arc<AtomicU64>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Create a tracker whose last activity is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record progress
    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded progress
    pub fn idle(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_millis.load(Ordering::Relaxed)))
    }
}

/// Periodically compares idle time against the stall threshold
///
/// On a stall it marks the run stalled, cancels the shared shutdown token and
/// stops. It fires at most once.
pub struct Watchdog {
    activity: ActivityTracker,
    config: WatchdogConfig,
    shutdown: CancellationToken,
    stalled: Arc<AtomicBool>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Watchdog {
    /// Create a watchdog escalating through `shutdown`
    pub fn new(activity: ActivityTracker, config: WatchdogConfig, shutdown: CancellationToken) -> Self {
        Self {
            activity,
            config,
            shutdown,
            stalled: Arc::new(AtomicBool::new(false)),
            event_tx: None,
        }
    }

    /// Publish [`Event::StallDetected`] when firing
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Flag set once a stall was detected
    pub fn stalled_flag(&self) -> Arc<AtomicBool> {
        self.stalled.clone()
    }

    /// Poll until `cancel` fires or a stall is detected
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Watchdog stopped");
                    break;
                }
                _ = interval.tick() => {
                    let idle = self.activity.idle();
                    if idle <= self.config.stall_threshold {
                        continue;
                    }

                    error!(
                        idle_secs = idle.as_secs(),
                        threshold_secs = self.config.stall_threshold.as_secs(),
                        "Acquisition stalled, initiating shutdown"
                    );
                    self.stalled.store(true, Ordering::SeqCst);
                    if let Some(tx) = &self.event_tx {
                        tx.send(Event::StallDetected {
                            idle_secs: idle.as_secs(),
                        })
                        .ok();
                    }
                    self.shutdown.cancel();
                    break;
                }
            }
        }
    }
}
