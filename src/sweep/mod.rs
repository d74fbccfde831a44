//! The sweep: one pass over all due grant records.
//!
//! A sweep prunes the protection tracker, runs the expiration pass over due
//! simple grants, then the replacement pass over due replacement grants,
//! sequentially. Records are processed one at a time to respect the
//! gateway's rate limits and to keep the protect-then-grant ordering of the
//! replacement pass deterministic.
//!
//! Per-record failures are counted and never abort the sweep; the record
//! stays in the store and is retried on the next sweep. Only a failure of
//! the due-record query itself is fatal for the tick.

mod expire;
mod replace;

use crate::config::SweepConfig;
use crate::db::{Database, DbError};
use crate::gateway::CapabilityGateway;
use crate::metrics;
use crate::protect::ProtectionTracker;
use std::sync::Arc;
use tracing::{debug, info};

/// Aggregate counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Due records examined.
    pub processed: u64,
    /// Records resolved by plain removal.
    pub removed: u64,
    /// Records resolved by a completed swap.
    pub replaced: u64,
    /// Records retained for retry after a failure.
    pub errors: u64,
}

impl SweepStats {
    /// True when the sweep found nothing due and touched nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Executes sweeps over the grant store.
///
/// Deterministic and timer-free: [`Sweeper::run`] performs exactly one
/// sweep. The periodic driver lives in [`crate::scheduler`].
pub struct Sweeper {
    pub(crate) db: Database,
    pub(crate) gateway: Arc<dyn CapabilityGateway>,
    pub(crate) tracker: Arc<ProtectionTracker>,
    pub(crate) cfg: SweepConfig,
}

impl Sweeper {
    /// Create a sweeper sharing the store's protection tracker.
    pub fn new(
        db: Database,
        gateway: Arc<dyn CapabilityGateway>,
        tracker: Arc<ProtectionTracker>,
        cfg: SweepConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            tracker,
            cfg,
        }
    }

    /// The shared protection tracker.
    pub fn tracker(&self) -> &Arc<ProtectionTracker> {
        &self.tracker
    }

    /// Run one sweep: expiration pass, then replacement pass.
    ///
    /// Errors only when due records cannot be listed at all; the scheduler
    /// logs that and retries on the next tick.
    pub async fn run(&self) -> Result<SweepStats, DbError> {
        self.tracker.prune_expired();

        let now = chrono::Utc::now().timestamp();
        let mut stats = SweepStats::default();

        expire::run_pass(self, now, &mut stats).await?;
        replace::run_pass(self, now, &mut stats).await?;

        metrics::record_sweep(&stats);

        if stats.is_empty() {
            debug!("Sweep found no due grants");
        } else {
            info!(
                processed = stats.processed,
                removed = stats.removed,
                replaced = stats.replaced,
                errors = stats.errors,
                "Sweep completed"
            );
        }

        Ok(stats)
    }

    /// Pause between batches so sequential gateway calls stay under the
    /// platform's rate limits.
    pub(crate) async fn pace(&self, processed: u64) {
        if self.cfg.batch_size > 0
            && self.cfg.batch_pause_ms > 0
            && processed > 0
            && processed % self.cfg.batch_size == 0
        {
            tokio::time::sleep(self.cfg.batch_pause()).await;
        }
    }
}
