//! Property-based test generators using proptest.
//!
//! Provides strategies for generating branch ids and sequences of
//! provider operations.

use crate::fixtures::xid;
use proptest::prelude::*;
use xapool_facade::{Xid, MAX_BRANCH_QUALIFIER_SIZE, MAX_GTRID_SIZE};

/// Strategy for generating valid branch ids.
pub fn xid_strategy() -> impl Strategy<Value = Xid> {
    (
        any::<i32>(),
        prop::collection::vec(any::<u8>(), 1..=MAX_GTRID_SIZE),
        prop::collection::vec(any::<u8>(), 0..=MAX_BRANCH_QUALIFIER_SIZE),
    )
        .prop_map(|(format_id, gtrid, bqual)| {
            Xid::new(format_id, gtrid, bqual).expect("Generated xid within size limits")
        })
}

/// A provider operation, naming its branch by [`xid`] number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOp {
    /// `start(xid(n))`
    Start(u32),
    /// `end_and_prepare(xid(n))`
    EndAndPrepare(u32),
    /// `commit(xid(n), ignore_unknown)`
    Commit(u32, bool),
    /// `rollback(xid(n))`
    Rollback(u32),
    /// `fail_and_rollback(xid(n))`
    FailAndRollback(u32),
    /// `recover()`
    Recover,
}

impl PoolOp {
    /// Returns the branch this operation targets, if any.
    pub fn xid(&self) -> Option<Xid> {
        match *self {
            PoolOp::Start(n)
            | PoolOp::EndAndPrepare(n)
            | PoolOp::Commit(n, _)
            | PoolOp::Rollback(n)
            | PoolOp::FailAndRollback(n) => Some(xid(n)),
            PoolOp::Recover => None,
        }
    }
}

/// Strategy for a single operation over branches `0..branches`.
///
/// Starts and prepares are weighted up so sequences build real pools.
pub fn pool_op_strategy(branches: u32) -> impl Strategy<Value = PoolOp> {
    let n = 0..branches.max(1);
    prop_oneof![
        4 => n.clone().prop_map(PoolOp::Start),
        4 => n.clone().prop_map(PoolOp::EndAndPrepare),
        2 => (n.clone(), any::<bool>()).prop_map(|(n, ignore)| PoolOp::Commit(n, ignore)),
        2 => n.clone().prop_map(PoolOp::Rollback),
        1 => n.prop_map(PoolOp::FailAndRollback),
        1 => Just(PoolOp::Recover),
    ]
}

/// Strategy for a sequence of operations.
pub fn pool_ops_strategy(branches: u32, max_len: usize) -> impl Strategy<Value = Vec<PoolOp>> {
    prop::collection::vec(pool_op_strategy(branches), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_xids_are_valid(xid in xid_strategy()) {
            prop_assert!(!xid.global_transaction_id().is_empty());
            prop_assert!(xid.global_transaction_id().len() <= MAX_GTRID_SIZE);
            prop_assert!(xid.branch_qualifier().len() <= MAX_BRANCH_QUALIFIER_SIZE);
        }

        #[test]
        fn ops_stay_within_branch_range(ops in pool_ops_strategy(3, 20)) {
            prop_assert!(!ops.is_empty());
            for op in ops {
                if let Some(target) = op.xid() {
                    prop_assert!((0..3).any(|n| xid(n) == target));
                }
            }
        }
    }
}
