//! Property tests: random operation sequences against a recording factory.

use proptest::prelude::*;
use std::collections::HashSet;
use xapool_core::{BranchAction, ErrorKind, PoolError, PoolingXaProvider, Xid};
use xapool_testkit::prelude::*;

type Provider = PoolingXaProvider<RecordingFactory>;

fn idle_ids(provider: &Provider) -> Vec<usize> {
    provider.idle_facades().map(|f| f.id()).collect()
}

fn mapped_ids(provider: &Provider) -> Vec<usize> {
    provider
        .mapped_branches()
        .iter()
        .filter_map(|x| provider.mapped_facade(x))
        .map(|f| f.id())
        .collect()
}

/// Checks the pool invariants that must hold between any two calls.
///
/// `unended` holds mapped branches whose `end_and_prepare` failed; their
/// facades stay bound until the branch is finalized.
fn check_invariants(
    provider: &Provider,
    factory: &RecordingFactory,
    unended: &HashSet<Xid>,
) -> Result<(), TestCaseError> {
    let idle = idle_ids(provider);
    let mapped = mapped_ids(provider);

    // Exclusivity: apart from failed prepares, at most one facade holds an
    // unended branch, and it is the active one
    let busy: Vec<_> = provider
        .mapped_branches()
        .into_iter()
        .filter(|x| provider.mapped_facade(x).is_some_and(|f| f.branch().is_some()))
        .filter(|x| !unended.contains(x))
        .collect();
    prop_assert!(busy.len() <= 1);
    prop_assert_eq!(busy.first(), provider.active_branch());
    if let Some(active) = provider.active_branch() {
        prop_assert!(provider.mapped_branches().contains(active));
    }

    // Conservation: every created facade is idle or mapped, exactly once
    let mut all: Vec<usize> = idle.iter().chain(mapped.iter()).copied().collect();
    all.sort_unstable();
    let expected: Vec<usize> = (0..factory.created()).collect();
    prop_assert_eq!(all, expected);

    // Idle safety: nothing in the idle queue is bound to a branch
    prop_assert!(provider.idle_facades().all(|f| f.branch().is_none()));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn random_sequences_keep_pool_consistent(
        ops in pool_ops_strategy(4, 48),
        prepare_faults in prop::collection::vec(prop::bool::weighted(0.25), 48),
    ) {
        let factory = RecordingFactory::new();
        let mut provider = PoolingXaProvider::from_factory(factory.clone());
        provider.open().unwrap();
        let mut started = 0;
        let mut unended: HashSet<Xid> = HashSet::new();

        for (op, fail_prepare) in ops.into_iter().zip(prepare_faults) {
            let target = op.xid();
            let active = provider.active_branch().cloned();
            let mapped = provider.mapped_branches();
            let idle_before = idle_ids(&provider);
            let is_active = target.is_some() && active == target;
            let is_mapped = target.as_ref().is_some_and(|x| mapped.contains(x));
            let is_unended = target.as_ref().is_some_and(|x| unended.contains(x));
            let owner = target
                .as_ref()
                .and_then(|x| provider.mapped_facade(x))
                .map(|f| f.id());

            match op {
                PoolOp::Start(n) => {
                    let result = provider.start(&xid(n));
                    let allowed = active.is_none() && !is_mapped;
                    prop_assert_eq!(result.is_ok(), allowed, "start {:?}", result);
                    if let Err(err) = result {
                        prop_assert_eq!(err.kind(), ErrorKind::StateViolation);
                    } else {
                        started += 1;
                        // FIFO reuse: the head of the idle queue is taken first
                        if let Some(&head) = idle_before.first() {
                            prop_assert_eq!(provider.mapped_facade(&xid(n)).map(|f| f.id()), Some(head));
                        }
                    }
                }
                PoolOp::EndAndPrepare(n) => {
                    let inject = fail_prepare && is_active;
                    if inject {
                        factory.fail_next(FacadeCall::EndAndPrepare, 1);
                    }
                    let result = provider.end_and_prepare(&xid(n));
                    prop_assert_eq!(result.is_ok(), is_active && !inject, "end {:?}", result);
                    if inject {
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Resource);
                        unended.insert(xid(n));
                    }
                    if is_active {
                        prop_assert!(provider.active_branch().is_none());
                    } else {
                        prop_assert_eq!(provider.active_branch(), active.as_ref());
                    }
                }
                PoolOp::Commit(n, ignore_unknown) => {
                    let result = provider.commit(&xid(n), ignore_unknown);
                    if is_active {
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::StateViolation);
                    } else if is_unended {
                        // Never prepared, so the commit is refused and the branch discarded
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
                    } else if is_mapped || ignore_unknown {
                        prop_assert!(result.is_ok(), "commit {:?}", result);
                    } else {
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
                    }
                }
                PoolOp::Rollback(n) => {
                    let result = provider.rollback(&xid(n));
                    if is_active {
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::StateViolation);
                    } else if is_mapped {
                        prop_assert!(result.is_ok(), "rollback {:?}", result);
                    } else {
                        prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Transient);
                    }
                }
                PoolOp::FailAndRollback(n) => {
                    let result = provider.fail_and_rollback(&xid(n));
                    prop_assert!(result.is_ok(), "fail_and_rollback {:?}", result);
                    if is_active {
                        prop_assert!(provider.active_branch().is_none());
                    }
                }
                PoolOp::Recover => {
                    let mut expected: Vec<_> = mapped
                        .into_iter()
                        .filter(|x| Some(x) != active.as_ref() && !unended.contains(x))
                        .collect();
                    expected.sort();
                    prop_assert_eq!(provider.recover().unwrap(), expected);
                }
            }

            // A finalized branch's facade goes to the tail of the idle queue
            if let (Some(x), Some(id)) = (target.as_ref(), owner) {
                if !provider.mapped_branches().contains(x) {
                    let idle = idle_ids(&provider);
                    prop_assert_eq!(idle.last(), Some(&id));
                }
            }

            let still_mapped = provider.mapped_branches();
            unended.retain(|x| still_mapped.contains(x));
            check_invariants(&provider, &factory, &unended)?;
        }

        prop_assert_eq!(provider.stats().branches_started, started);
        provider.close().unwrap();
        prop_assert_eq!(provider.idle_count() + provider.mapped_count(), 0);
    }

    #[test]
    fn transient_failure_never_leaks_facade(
        prepared in 1u32..6,
        pick in any::<prop::sample::Index>(),
        action in prop_oneof![
            Just(BranchAction::Commit),
            Just(BranchAction::Rollback),
            Just(BranchAction::FailAndRollback),
        ],
    ) {
        let factory = RecordingFactory::new();
        let mut provider = PoolingXaProvider::from_factory(factory.clone());
        provider.open().unwrap();
        for n in 0..prepared {
            provider.start(&xid(n)).unwrap();
            provider.end_and_prepare(&xid(n)).unwrap();
        }

        let target = xid(pick.index(prepared as usize) as u32);
        let id = provider.mapped_facade(&target).map(|f| f.id()).unwrap();
        let result = match action {
            BranchAction::Commit => {
                factory.fail_next(FacadeCall::Commit, 1);
                provider.commit(&target, false)
            }
            BranchAction::Rollback => {
                factory.fail_next(FacadeCall::Rollback, 1);
                provider.rollback(&target)
            }
            _ => {
                factory.fail_next(FacadeCall::FailAndRollback, 1);
                provider.fail_and_rollback(&target)
            }
        };

        let is_transient = matches!(result, Err(PoolError::Transient { .. }));
        prop_assert!(is_transient);
        let idle = idle_ids(&provider);
        prop_assert_eq!(idle.iter().filter(|&&i| i == id).count(), 1);
        prop_assert!(!provider.mapped_branches().contains(&target));
        check_invariants(&provider, &factory, &HashSet::new())?;

        // The branch is still prepared and can be retried
        prop_assert!(factory.prepared().contains(&target));
        prop_assert!(provider.commit(&target, false).is_ok());
        check_invariants(&provider, &factory, &HashSet::new())?;
    }

    #[test]
    fn idle_facades_are_reused_in_return_order(
        order in Just((0u32..5).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let factory = RecordingFactory::new();
        let mut provider = PoolingXaProvider::from_factory(factory.clone());
        provider.open().unwrap();
        for n in 0..5 {
            provider.start(&xid(n)).unwrap();
            provider.end_and_prepare(&xid(n)).unwrap();
        }

        let mut returned = Vec::new();
        for &n in &order {
            returned.push(provider.mapped_facade(&xid(n)).map(|f| f.id()).unwrap());
            provider.commit(&xid(n), false).unwrap();
        }

        let mut reused = Vec::new();
        for n in 10..15 {
            provider.start(&xid(n)).unwrap();
            reused.push(provider.mapped_facade(&xid(n)).map(|f| f.id()).unwrap());
            provider.end_and_prepare(&xid(n)).unwrap();
        }
        prop_assert_eq!(reused, returned);
        prop_assert_eq!(factory.created(), 5);
    }
}
