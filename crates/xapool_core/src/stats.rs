//! Pool statistics.
//!
//! Counters describing how the provider has used its facades.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = provider.stats();
//! println!("Facades created: {}", stats.facades_created);
//! println!("Committed: {}", stats.branches_committed);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool statistics.
///
/// Values are monotonically increasing for the lifetime of the provider;
/// they are not reset by `open()`.
#[derive(Debug, Default)]
pub struct PoolStats {
    // Facade counters
    facades_created: AtomicU64,
    facades_discarded: AtomicU64,

    // Branch counters
    branches_started: AtomicU64,
    branches_prepared: AtomicU64,
    branches_committed: AtomicU64,
    branches_rolled_back: AtomicU64,

    // Finalize counters
    unmapped_finalizations: AtomicU64,
    transient_failures: AtomicU64,
    recoveries: AtomicU64,
}

impl PoolStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_facade_created(&self) {
        self.facades_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_facade_discarded(&self) {
        self.facades_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_branch_started(&self) {
        self.branches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_branch_prepared(&self) {
        self.branches_prepared.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_branch_committed(&self) {
        self.branches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_branch_rolled_back(&self) {
        self.branches_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmapped_finalization(&self) {
        self.unmapped_finalizations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            facades_created: self.facades_created.load(Ordering::Relaxed),
            facades_discarded: self.facades_discarded.load(Ordering::Relaxed),
            branches_started: self.branches_started.load(Ordering::Relaxed),
            branches_prepared: self.branches_prepared.load(Ordering::Relaxed),
            branches_committed: self.branches_committed.load(Ordering::Relaxed),
            branches_rolled_back: self.branches_rolled_back.load(Ordering::Relaxed),
            unmapped_finalizations: self.unmapped_finalizations.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of pool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Facades produced by the factory and opened.
    pub facades_created: u64,
    /// Facades dropped after their `start` failed.
    pub facades_discarded: u64,
    /// Branches started.
    pub branches_started: u64,
    /// Branches ended and prepared.
    pub branches_prepared: u64,
    /// Branches committed.
    pub branches_committed: u64,
    /// Branches rolled back (plain or after failure).
    pub branches_rolled_back: u64,
    /// Finalize calls for branches this provider never started.
    pub unmapped_finalizations: u64,
    /// Finalize or recovery calls that failed transiently.
    pub transient_failures: u64,
    /// Recovery scans performed.
    pub recoveries: u64,
}

impl StatsSnapshot {
    /// Facades currently owned by the provider, if none were closed.
    pub fn live_facades(&self) -> u64 {
        self.facades_created - self.facades_discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let snap = PoolStats::new().snapshot();
        assert_eq!(snap, StatsSnapshot::default());
    }

    #[test]
    fn record_facades() {
        let stats = PoolStats::new();
        stats.record_facade_created();
        stats.record_facade_created();
        stats.record_facade_discarded();

        let snap = stats.snapshot();
        assert_eq!(snap.facades_created, 2);
        assert_eq!(snap.facades_discarded, 1);
        assert_eq!(snap.live_facades(), 1);
    }

    #[test]
    fn record_branches() {
        let stats = PoolStats::new();
        stats.record_branch_started();
        stats.record_branch_prepared();
        stats.record_branch_committed();
        stats.record_branch_rolled_back();
        stats.record_unmapped_finalization();
        stats.record_transient_failure();
        stats.record_recovery();

        let snap = stats.snapshot();
        assert_eq!(snap.branches_started, 1);
        assert_eq!(snap.branches_prepared, 1);
        assert_eq!(snap.branches_committed, 1);
        assert_eq!(snap.branches_rolled_back, 1);
        assert_eq!(snap.unmapped_finalizations, 1);
        assert_eq!(snap.transient_failures, 1);
        assert_eq!(snap.recoveries, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = PoolStats::new();
        stats.record_branch_started();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["branches_started"], 1);
    }
}
