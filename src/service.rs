//! Service lifecycle.
//!
//! The hosting layer builds a [`Service`], calls [`Service::start`] with its
//! shutdown token and later [`ServiceHandle::stop`]. Stopping lets the pass
//! in progress finish before the handle resolves.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConfigError, Settings};
use crate::core::{Reconciler, Scheduler};
use crate::store::StoreProvider;

/// A reconciler paired with the scheduler that drives it
pub struct Service {
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
}

impl Service {
    pub fn new(reconciler: Reconciler, scheduler: Scheduler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            scheduler,
        }
    }

    /// Build from validated settings; an unusable interval is a startup error
    pub fn from_settings(
        provider: Arc<dyn StoreProvider>,
        settings: &Settings,
    ) -> Result<Self, ConfigError> {
        let scheduler = Scheduler::new(settings.check_interval)?;
        Ok(Self::new(Reconciler::new(provider, settings), scheduler))
    }

    /// Spawn the scheduling loop. Cancelling `cancel` (or calling
    /// [`ServiceHandle::stop`]) ends the loop after the current pass.
    pub fn start(self, cancel: &CancellationToken) -> ServiceHandle {
        let shutdown = cancel.child_token();
        let loop_token = shutdown.clone();
        let interval = self.scheduler.interval();
        let grace_period = self.reconciler.policy().grace_period();

        let Service {
            reconciler,
            scheduler,
        } = self;

        let task = tokio::spawn(async move {
            scheduler
                .run(loop_token, move |cancel| {
                    let reconciler = Arc::clone(&reconciler);
                    async move {
                        if let Err(e) = reconciler.run_pass(&cancel).await {
                            error!(error = ?e, "Reconciliation pass failed");
                        }
                    }
                })
                .await
        });

        info!(
            interval_ms = interval.as_millis() as u64,
            grace_period = %grace_period,
            "Reconciler started"
        );

        ServiceHandle { shutdown, task }
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop exited after its last pass
    Graceful { passes: u64 },

    /// The caller gave up waiting; the last pass finishes in the background
    Abandoned,
}

/// Handle to control a running service
pub struct ServiceHandle {
    shutdown: CancellationToken,
    task: JoinHandle<u64>,
}

impl ServiceHandle {
    /// Request shutdown and wait for the current pass to finish, unless
    /// `cancel` fires first
    pub async fn stop(self, cancel: &CancellationToken) -> Result<StopOutcome> {
        info!("Stopping reconciler, waiting for the current pass to finish");
        self.shutdown.cancel();

        let mut task = self.task;
        tokio::select! {
            joined = &mut task => {
                let passes = joined.context("Reconciler task failed")?;
                info!(passes, "Reconciler stopped gracefully");
                Ok(StopOutcome::Graceful { passes })
            }
            _ = cancel.cancelled() => {
                warn!("Gave up waiting for the current pass to finish");
                Ok(StopOutcome::Abandoned)
            }
        }
    }
}
