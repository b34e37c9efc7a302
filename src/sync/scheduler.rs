//! Periodic background tasks.
//!
//! Every recurring job implements [`Task`] and is driven by a single
//! scheduler loop with a shared shutdown signal, instead of each job
//! carrying its own timer. An interval override lets tests run every task
//! on a fast clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::sync::SyncEngine;
use crate::sync::error::Result;

/// A named background job with its own cadence.
#[async_trait]
pub(crate) trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn execute(&self, engine: &SyncEngine) -> Result<()>;
}

/// Spawns one loop per task. Each loop waits a full interval before the
/// first run, executes the task, logs failures without stopping, and exits
/// when the shutdown signal flips to `true`.
pub(crate) fn start_scheduled_tasks(
    engine: Arc<SyncEngine>,
    shutdown: watch::Receiver<bool>,
    interval_override: Option<Duration>,
    tasks: Vec<Arc<dyn Task>>,
) -> Vec<JoinHandle<()>> {
    tasks
        .into_iter()
        .map(|task| {
            let engine = Arc::clone(&engine);
            let mut shutdown = shutdown.clone();
            let period = interval_override.unwrap_or_else(|| task.interval());
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately; consume it so the
                // task first runs one full interval after startup.
                ticker.tick().await;

                tracing::debug!(
                    target: "mstwins_sync::scheduler",
                    task = task.name(),
                    period_secs = period.as_secs_f64(),
                    "scheduled task started"
                );

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = task.execute(&engine).await {
                                tracing::warn!(
                                    target: "mstwins_sync::scheduler",
                                    task = task.name(),
                                    "scheduled task failed: {}",
                                    e
                                );
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                tracing::debug!(
                                    target: "mstwins_sync::scheduler",
                                    task = task.name(),
                                    "scheduled task stopping"
                                );
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect()
}

/// Removes expired cache entries so stale views do not sit in memory until
/// the next read touches them.
pub(crate) struct CacheSweep {
    pub(crate) interval: Duration,
}

#[async_trait]
impl Task for CacheSweep {
    fn name(&self) -> &'static str {
        "cache_sweep"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, engine: &SyncEngine) -> Result<()> {
        let removed = engine.sweep_expired_views();
        if removed > 0 {
            tracing::info!(
                target: "mstwins_sync::scheduler::cache_sweep",
                "Removed {} expired cache entries",
                removed
            );
        } else {
            tracing::debug!(
                target: "mstwins_sync::scheduler::cache_sweep",
                "No expired cache entries to remove"
            );
        }
        Ok(())
    }
}

/// Invalidates the relationship views of every viewer with an active change
/// subscription, so long-lived sessions refetch even when no realtime event
/// arrived.
pub(crate) struct ViewRefresh {
    pub(crate) interval: Duration,
}

#[async_trait]
impl Task for ViewRefresh {
    fn name(&self) -> &'static str {
        "view_refresh"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, engine: &SyncEngine) -> Result<()> {
        let refreshed = engine.refresh_active_views();
        if refreshed > 0 {
            tracing::debug!(
                target: "mstwins_sync::scheduler::view_refresh",
                "Refreshed views for {} active viewers",
                refreshed
            );
        }
        Ok(())
    }
}
