//! Prometheus metrics for the grant scheduler.
//!
//! Metrics are optional: until [`init`] is called every recording helper is
//! a no-op, so embedding applications that don't scrape can skip the setup.

use crate::sweep::SweepStats;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Total sweeps executed.
pub static SWEEPS_RUN: OnceLock<IntCounter> = OnceLock::new();

/// Total due records examined across all sweeps.
pub static GRANTS_PROCESSED: OnceLock<IntCounter> = OnceLock::new();

/// Total records resolved by plain removal (expired simple grants and
/// abandoned replacements).
pub static GRANTS_REMOVED: OnceLock<IntCounter> = OnceLock::new();

/// Total records resolved by a completed swap.
pub static GRANTS_REPLACED: OnceLock<IntCounter> = OnceLock::new();

/// Total per-record errors (records retained for retry).
pub static SWEEP_ERRORS: OnceLock<IntCounter> = OnceLock::new();

/// Total guarded creations rejected by an active protection window.
pub static PROTECTED_CONFLICTS: OnceLock<IntCounter> = OnceLock::new();

/// Total errant re-registrations removed by post-swap reconciliation.
pub static RECONCILED_RECORDS: OnceLock<IntCounter> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(SWEEPS_RUN, IntCounter::new("grant_sweeps_total", "Sweeps executed"));
    register!(GRANTS_PROCESSED, IntCounter::new("grants_processed_total", "Due grant records examined"));
    register!(GRANTS_REMOVED, IntCounter::new("grants_removed_total", "Grant records resolved by removal"));
    register!(GRANTS_REPLACED, IntCounter::new("grants_replaced_total", "Grant records resolved by swap"));
    register!(SWEEP_ERRORS, IntCounter::new("grant_sweep_errors_total", "Per-record sweep errors (records retained)"));
    register!(PROTECTED_CONFLICTS, IntCounter::new("grant_protected_conflicts_total", "Creations rejected by a protection window"));
    register!(RECONCILED_RECORDS, IntCounter::new("grant_reconciled_records_total", "Errant records removed by reconciliation"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

/// Record the aggregate of one sweep.
#[inline]
pub fn record_sweep(stats: &SweepStats) {
    if let Some(c) = SWEEPS_RUN.get() {
        c.inc();
    }
    if let Some(c) = GRANTS_PROCESSED.get() {
        c.inc_by(stats.processed);
    }
    if let Some(c) = GRANTS_REMOVED.get() {
        c.inc_by(stats.removed);
    }
    if let Some(c) = GRANTS_REPLACED.get() {
        c.inc_by(stats.replaced);
    }
    if let Some(c) = SWEEP_ERRORS.get() {
        c.inc_by(stats.errors);
    }
}

/// Record a creation rejected by the protection guard.
#[inline]
pub fn record_protected_conflict() {
    if let Some(c) = PROTECTED_CONFLICTS.get() {
        c.inc();
    }
}

/// Record errant records removed by a reconciliation check.
#[inline]
pub fn record_reconciled(count: u64) {
    if let Some(c) = RECONCILED_RECORDS.get() {
        c.inc_by(count);
    }
}
