//! Priority scheduling with bounded concurrency
//!
//! Channels are admitted in priority order. A permit from the concurrency limiter
//! is acquired *before* each channel task is spawned, so a lower-priority channel
//! can never overtake a higher-priority one waiting for a slot. Tasks run in a
//! [`JoinSet`]; one channel failing (or panicking) never affects its siblings.

use crate::coordinator::{AcquisitionContext, ChannelOutcome, run_channel};
use crate::types::{ChannelStatus, ChannelTarget, Event, sort_targets};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Result of a scheduling pass
#[derive(Clone, Debug, Default)]
pub struct ScheduleSummary {
    /// Channels that completed
    pub succeeded: usize,
    /// Channels configured (including those never started)
    pub total: usize,
    /// Outcome of every channel that was started, in completion order
    pub outcomes: Vec<ChannelOutcome>,
}

impl ScheduleSummary {
    /// Channels that were never admitted
    pub fn not_started(&self) -> usize {
        self.total.saturating_sub(self.outcomes.len())
    }
}

/// Runs channel coordinators under a concurrency limit
pub struct Scheduler {
    ctx: AcquisitionContext,
    concurrent_limit: Arc<Semaphore>,
}

impl Scheduler {
    /// Create a scheduler admitting at most `acquisition.max_concurrent_channels` at once
    pub fn new(ctx: AcquisitionContext) -> Self {
        let limit = ctx.config.acquisition.max_concurrent_channels.max(1);
        Self {
            ctx,
            concurrent_limit: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Run every target to completion
    ///
    /// Once shutdown is requested no further channels are admitted; they stay
    /// `pending`. Channels already running are left to wind down on their own.
    pub async fn run(&self, targets: &[ChannelTarget]) -> ScheduleSummary {
        let ordered = sort_targets(targets);
        let total = ordered.len();
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for target in ordered {
            let permit = tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => None,
                permit = self.concurrent_limit.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!(channel = %target.name, "Shutdown requested, not starting remaining channels");
                break;
            };

            let ctx = self.ctx.clone();
            let name = target.name.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                run_channel(&ctx, &target).await
            });
            names.insert(handle.id(), name);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(e) => {
                    let channel = names.get(&e.id()).cloned().unwrap_or_default();
                    error!(channel = %channel, error = %e, "Channel task panicked");
                    self.ctx
                        .metrics
                        .set_status(&channel, ChannelStatus::Failed)
                        .await;
                    self.ctx
                        .event_tx
                        .send(Event::ChannelFailed {
                            channel: channel.clone(),
                            error: e.to_string(),
                        })
                        .ok();
                    outcomes.push(ChannelOutcome::failed(&channel, 0, e.to_string()));
                }
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(succeeded, total, "{} of {} channels succeeded", succeeded, total);

        ScheduleSummary {
            succeeded,
            total,
            outcomes,
        }
    }
}
