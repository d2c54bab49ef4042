//! Periodic background jobs
//!
//! Three loops: expiry sweep, adjustment auto-commit and retention cleanup.
//! Each job has its own [`SingleFlight`] guard so a run that is still going
//! when the next one is due (or is triggered manually) is skipped, not doubled.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{AdjustmentReconciler, AutoCommitReport, ReservationManager, SweepReport};
use crate::config::SchedulerConfig;
use crate::error::AppResult;

/// Mutual exclusion flag for one job, scoped to a scheduler instance
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<AtomicBool>,
}

impl SingleFlight {
    /// `None` while another run holds the flag
    pub fn try_acquire(&self) -> Option<SingleFlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop
#[derive(Debug)]
pub struct SingleFlightGuard {
    running: Arc<AtomicBool>,
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct InventoryScheduler {
    reservations: ReservationManager,
    adjustments: AdjustmentReconciler,
    config: SchedulerConfig,
    expiry: SingleFlight,
    auto_commit: SingleFlight,
    retention: SingleFlight,
}

impl InventoryScheduler {
    pub fn new(
        reservations: ReservationManager,
        adjustments: AdjustmentReconciler,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reservations,
            adjustments,
            config,
            expiry: SingleFlight::default(),
            auto_commit: SingleFlight::default(),
            retention: SingleFlight::default(),
        }
    }

    /// Release expired holds; `Ok(None)` when a previous run is still active
    pub async fn run_expiry_sweep(&self) -> AppResult<Option<SweepReport>> {
        let Some(_guard) = self.expiry.try_acquire() else {
            tracing::debug!(job = "expiry_sweep", "Previous run still active; skipping");
            return Ok(None);
        };
        self.reservations.sweep_expired(Utc::now()).await.map(Some)
    }

    pub async fn run_auto_commit(&self) -> AppResult<Option<AutoCommitReport>> {
        let Some(_guard) = self.auto_commit.try_acquire() else {
            tracing::debug!(job = "auto_commit", "Previous run still active; skipping");
            return Ok(None);
        };
        self.adjustments.auto_commit_sweep(Utc::now()).await.map(Some)
    }

    pub async fn run_retention(&self) -> AppResult<Option<u64>> {
        let Some(_guard) = self.retention.try_acquire() else {
            tracing::debug!(job = "retention", "Previous run still active; skipping");
            return Ok(None);
        };
        self.reservations.purge_released(Utc::now()).await.map(Some)
    }

    /// Start all jobs; they stop when `shutdown` turns true or its sender drops
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled");
            return Vec::new();
        }

        tracing::info!(
            expiry_secs = self.config.expiry_sweep_secs,
            auto_commit_secs = self.config.auto_commit_sweep_secs,
            retention_secs = self.config.retention_sweep_secs,
            "Starting scheduler"
        );

        let expiry = self.clone();
        let auto_commit = self.clone();
        let retention = self.clone();

        vec![
            spawn_job(
                "expiry_sweep",
                self.config.expiry_sweep_interval(),
                shutdown.clone(),
                move || {
                    let scheduler = expiry.clone();
                    async move { log_failure("expiry_sweep", scheduler.run_expiry_sweep().await) }
                },
            ),
            spawn_job(
                "auto_commit",
                self.config.auto_commit_interval(),
                shutdown.clone(),
                move || {
                    let scheduler = auto_commit.clone();
                    async move { log_failure("auto_commit", scheduler.run_auto_commit().await) }
                },
            ),
            spawn_job(
                "retention",
                self.config.retention_interval(),
                shutdown,
                move || {
                    let scheduler = retention.clone();
                    async move { log_failure("retention", scheduler.run_retention().await) }
                },
            ),
        ]
    }
}

fn log_failure<T>(job: &'static str, result: AppResult<T>) {
    if let Err(e) = result {
        tracing::error!(job, error = %e, "Scheduled job failed");
    }
}

fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(job = name, "Scheduler job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_excludes_second_run() {
        let flight = SingleFlight::default();
        let guard = flight.try_acquire();
        assert!(guard.is_some());
        assert!(flight.try_acquire().is_none());
        assert!(flight.is_running());
        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn test_single_flight_is_shared_by_clones() {
        let flight = SingleFlight::default();
        let other = flight.clone();
        let _guard = flight.try_acquire();
        assert!(other.try_acquire().is_none());
    }
}
