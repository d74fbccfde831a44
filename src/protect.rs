//! In-memory protection tracker for freshly swapped capabilities.
//!
//! After a replacement swap grants the final capability, an independent
//! event listener on the platform may observe the role-grant event and try
//! to re-register that capability as a new temporary grant. The tracker is
//! the process-local denylist that closes this race: the replacement pass
//! protects the (scope, principal, capability) triple before calling the
//! gateway, and every guarded creation path consults it.
//!
//! # Architecture
//!
//! - Entries are never persisted; a restart simply forgets them
//! - Expiry is checked lazily at lookup time
//! - The sweep calls `prune_expired` each tick, so stale entries never
//!   need a timer of their own

use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// A time-boxed protection entry.
///
/// Timestamps are Unix milliseconds: protection windows are minutes long
/// and tests shrink them to tens of milliseconds.
#[derive(Debug, Clone)]
pub struct ProtectionEntry {
    pub scope_id: i64,
    pub principal_id: i64,
    pub capability_id: i64,
    pub reason: String,
    pub protected_at: i64,
    pub protected_until: i64,
}

impl ProtectionEntry {
    /// Check if this entry's window has elapsed.
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.protected_until
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Time-boxed denylist keyed by (scope, principal, capability).
#[derive(Debug, Default)]
pub struct ProtectionTracker {
    entries: DashMap<(i64, i64, i64), ProtectionEntry>,
}

impl ProtectionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Protect a triple for `window`. Overlapping calls for the same triple
    /// reset the window rather than stacking.
    pub fn protect(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
        reason: &str,
        window: Duration,
    ) -> ProtectionEntry {
        let now = now_ms();
        let entry = ProtectionEntry {
            scope_id,
            principal_id,
            capability_id,
            reason: reason.to_string(),
            protected_at: now,
            protected_until: now + window.as_millis() as i64,
        };

        debug!(
            scope = scope_id,
            principal = principal_id,
            capability = capability_id,
            until = entry.protected_until,
            "Capability protected"
        );

        self.entries
            .insert((scope_id, principal_id, capability_id), entry.clone());
        entry
    }

    /// True only while the triple's window is still open.
    pub fn is_protected(&self, scope_id: i64, principal_id: i64, capability_id: i64) -> bool {
        self.entries
            .get(&(scope_id, principal_id, capability_id))
            .is_some_and(|entry| !entry.is_expired(now_ms()))
    }

    /// Get the live entry for a triple, if any.
    pub fn get(
        &self,
        scope_id: i64,
        principal_id: i64,
        capability_id: i64,
    ) -> Option<ProtectionEntry> {
        self.entries
            .get(&(scope_id, principal_id, capability_id))
            .filter(|entry| !entry.is_expired(now_ms()))
            .map(|entry| entry.clone())
    }

    /// Drop a protection early (used when a swap is rolled back by hand).
    pub fn unprotect(&self, scope_id: i64, principal_id: i64, capability_id: i64) -> bool {
        self.entries
            .remove(&(scope_id, principal_id, capability_id))
            .is_some()
    }

    /// Prune entries whose window has elapsed.
    ///
    /// Called by the sweep at the start of every tick.
    pub fn prune_expired(&self) -> usize {
        let now = now_ms();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(count = removed, "Pruned expired protection entries");
        }

        removed
    }

    /// Number of tracked entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_and_expire() {
        let tracker = ProtectionTracker::new();

        tracker.protect(1, 10, 100, "swap", Duration::from_secs(60));
        assert!(tracker.is_protected(1, 10, 100));
        assert!(!tracker.is_protected(1, 10, 101));
        assert!(!tracker.is_protected(2, 10, 100));

        // An already-elapsed window is not protected, even before pruning.
        tracker.protect(1, 10, 200, "swap", Duration::ZERO);
        assert!(!tracker.is_protected(1, 10, 200));
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.prune_expired(), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_overlapping_protect_resets_window() {
        let tracker = ProtectionTracker::new();

        let first = tracker.protect(1, 10, 100, "swap", Duration::from_millis(1));
        let second = tracker.protect(1, 10, 100, "swap again", Duration::from_secs(60));
        assert!(second.protected_until > first.protected_until);
        assert_eq!(tracker.len(), 1);

        let live = tracker.get(1, 10, 100).expect("entry");
        assert_eq!(live.reason, "swap again");
    }

    #[test]
    fn test_unprotect() {
        let tracker = ProtectionTracker::new();

        tracker.protect(1, 10, 100, "swap", Duration::from_secs(60));
        assert!(tracker.unprotect(1, 10, 100));
        assert!(!tracker.is_protected(1, 10, 100));
        assert!(!tracker.unprotect(1, 10, 100));
    }
}
