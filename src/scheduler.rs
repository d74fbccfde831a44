//! Periodic sweep driver.
//!
//! One scheduler owns one timer task. `start` is an idempotent restart: it
//! first stops any live handle, so at most one timer is ever active per
//! scheduler. The design assumes a single scheduler instance per process;
//! running two in parallel voids the store's duplicate-key and protection
//! invariants.

use crate::sweep::Sweeper;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Operational status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub is_running: bool,
}

struct Active {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the sweep timer.
pub struct SweepScheduler {
    sweeper: Arc<Sweeper>,
    active: Mutex<Option<Active>>,
}

impl SweepScheduler {
    /// Wrap a sweeper in a (not yet started) scheduler.
    pub fn new(sweeper: Sweeper) -> Self {
        Self {
            sweeper: Arc::new(sweeper),
            active: Mutex::new(None),
        }
    }

    /// The wrapped sweeper, for running one-off sweeps out of band.
    pub fn sweeper(&self) -> &Arc<Sweeper> {
        &self.sweeper
    }

    /// Start the periodic sweep, stopping any previous timer first.
    ///
    /// The first sweep fires after the configured initial delay so a fresh
    /// process isn't sweeping while the platform connection is still
    /// settling; after that, one sweep per interval. A tick that outruns
    /// the interval delays the next tick rather than overlapping it.
    pub fn start(&self) {
        self.stop();

        let sweeper = Arc::clone(&self.sweeper);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let initial_delay = sweeper.cfg.initial_delay();
        let interval = sweeper.cfg.sweep_interval();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sweeper.run().await {
                            error!(error = %e, "Sweep failed; will retry next tick");
                        }
                    }
                }
            }

            debug!("Sweep scheduler task exited");
        });

        *self.active.lock() = Some(Active { token, handle });
        info!(
            interval_ms = self.sweeper.cfg.sweep_interval_ms,
            initial_delay_ms = self.sweeper.cfg.initial_delay_ms,
            "Sweep scheduler started"
        );
    }

    /// Cancel future ticks. An in-flight tick runs to completion.
    ///
    /// Returns whether a timer was active.
    pub fn stop(&self) -> bool {
        if let Some(active) = self.active.lock().take() {
            active.token.cancel();
            info!("Sweep scheduler stopped");
            true
        } else {
            false
        }
    }

    /// Whether the timer task is live.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Operational status.
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.is_running(),
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        if let Some(active) = self.active.lock().take() {
            active.token.cancel();
        }
    }
}
