//! Error paths: caller misuse, injected resource failures and shutdown.

use xapool_core::{BranchAction, ErrorKind, PoolError, PoolingXaProvider};
use xapool_facade::{XAER_PROTO, XAER_RMFAIL};
use xapool_testkit::prelude::*;

fn open_provider() -> (PoolingXaProvider<RecordingFactory>, RecordingFactory) {
    let factory = RecordingFactory::new();
    let mut provider = PoolingXaProvider::from_factory(factory.clone());
    provider.open().unwrap();
    (provider, factory)
}

fn prepare(provider: &mut PoolingXaProvider<RecordingFactory>, n: u32) {
    provider.start(&xid(n)).unwrap();
    provider.end_and_prepare(&xid(n)).unwrap();
}

fn idle_ids(provider: &PoolingXaProvider<RecordingFactory>) -> Vec<usize> {
    provider.idle_facades().map(|f| f.id()).collect()
}

// === Caller misuse ===

#[test]
fn operations_require_open_provider() {
    let factory = RecordingFactory::new();
    let mut provider = PoolingXaProvider::from_factory(factory.clone());

    for result in [
        provider.start(&xid(1)),
        provider.end_and_prepare(&xid(1)),
        provider.commit(&xid(1), true),
        provider.rollback(&xid(1)),
        provider.fail_and_rollback(&xid(1)),
    ] {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::StateViolation);
    }
    assert_eq!(provider.recover().unwrap_err().kind(), ErrorKind::StateViolation);
    assert!(factory.calls().is_empty());

    provider.close().unwrap();
}

#[test]
fn second_start_while_active_is_rejected() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();
    let logged = factory.calls().len();

    let err = provider.start(&xid(2)).unwrap_err();
    assert!(matches!(err, PoolError::StateViolation { .. }));
    assert!(!err.is_retryable());
    assert_eq!(factory.calls().len(), logged);
    assert_eq!(provider.active_branch(), Some(&xid(1)));
}

#[test]
fn start_of_prepared_branch_is_rejected() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);

    let err = provider.start(&xid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateViolation);
    assert_eq!(factory.created(), 1);
    assert_eq!(provider.mapped_branches(), vec![xid(1)]);
}

#[test]
fn end_requires_matching_active_branch() {
    let (mut provider, factory) = open_provider();

    let err = provider.end_and_prepare(&xid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateViolation);

    prepare(&mut provider, 1);
    provider.start(&xid(2)).unwrap();

    // A prepared branch is not the active one either
    assert_eq!(
        provider.end_and_prepare(&xid(1)).unwrap_err().kind(),
        ErrorKind::StateViolation
    );
    assert_eq!(factory.calls_of(FacadeCall::EndAndPrepare).len(), 1);
    assert_eq!(provider.active_branch(), Some(&xid(2)));
}

#[test]
fn finalizing_active_branch_needs_end_first() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();

    assert_eq!(provider.commit(&xid(1), true).unwrap_err().kind(), ErrorKind::StateViolation);
    assert_eq!(provider.rollback(&xid(1)).unwrap_err().kind(), ErrorKind::StateViolation);
    assert!(factory.calls_of(FacadeCall::Commit).is_empty());
    assert!(factory.calls_of(FacadeCall::Rollback).is_empty());
    assert_eq!(provider.mapped_count(), 1);
}

#[test]
fn open_while_active_is_rejected() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();

    assert_eq!(provider.open().unwrap_err().kind(), ErrorKind::StateViolation);
    assert!(factory.calls_of(FacadeCall::Close).is_empty());
    assert_eq!(provider.active_branch(), Some(&xid(1)));
}

#[test]
fn passthroughs_without_active_branch() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);

    assert!(matches!(
        provider.connection(),
        Err(PoolError::NoActiveBranch { operation: "connection" })
    ));
    assert!(matches!(
        provider.get_or_establish_connection(),
        Err(PoolError::NoActiveBranch {
            operation: "get_or_establish_connection"
        })
    ));
    assert_eq!(provider.close_connection().unwrap_err().kind(), ErrorKind::NoActiveBranch);
    assert_eq!(provider.is_connection_valid().unwrap_err().kind(), ErrorKind::NoActiveBranch);
    assert_eq!(
        provider.reestablish_connection().unwrap_err().kind(),
        ErrorKind::NoActiveBranch
    );
    assert_eq!(factory.created(), 1);
}

// === Facade creation and start ===

#[test]
fn creation_failure_is_reported() {
    let (mut provider, factory) = open_provider();
    factory.fail_next(FacadeCall::Create, 1);

    let err = provider.start(&xid(1)).unwrap_err();
    assert!(matches!(err, PoolError::ResourceCreation(_)));
    assert!(provider.active_branch().is_none());

    provider.start(&xid(1)).unwrap();
    assert_eq!(provider.stats().facades_created, 1);
}

#[test]
fn open_failure_is_reported_and_facade_dropped() {
    let (mut provider, factory) = open_provider();
    factory.fail_next(FacadeCall::Open, 1);

    let err = provider.recover().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceCreation);
    assert_eq!(provider.idle_count(), 0);
    assert_eq!(provider.stats().facades_created, 0);
}

#[test]
fn start_failure_discards_facade() {
    let (mut provider, factory) = open_provider();
    provider.recover().unwrap();
    assert_eq!(idle_ids(&provider), vec![0]);

    factory.fail_next(FacadeCall::Start, 1);
    let err = provider.start(&xid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(matches!(err, PoolError::Resource(ref e) if e.xa_code() == Some(XAER_RMFAIL)));

    // Closed best-effort, neither pooled nor mapped
    assert_eq!(factory.facades_for(FacadeCall::Start, &xid(1)), vec![0]);
    assert_eq!(factory.calls_of(FacadeCall::Close).len(), 1);
    assert_eq!(provider.idle_count(), 0);
    assert_eq!(provider.mapped_count(), 0);
    assert!(provider.active_branch().is_none());
    assert_eq!(provider.stats().facades_discarded, 1);

    provider.start(&xid(1)).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::Start, &xid(1)), vec![0, 1]);
}

#[test]
fn failed_prepare_keeps_start_available() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();
    factory.fail_next(FacadeCall::EndAndPrepare, 1);

    let err = provider.end_and_prepare(&xid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(provider.active_branch().is_none());
    assert_eq!(provider.mapped_branches(), vec![xid(1)]);

    provider.start(&xid(2)).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::Start, &xid(2)), vec![1]);

    // The failed branch can still be aborted through its own facade
    provider.fail_and_rollback(&xid(1)).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::FailAndRollback, &xid(1)), vec![0]);
    assert_eq!(idle_ids(&provider), vec![0]);
}

#[test]
fn rollback_after_failed_prepare_recycles_clean_facade() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();
    factory.fail_next(FacadeCall::EndAndPrepare, 1);
    assert!(provider.end_and_prepare(&xid(1)).is_err());

    provider.rollback(&xid(1)).unwrap();
    assert_eq!(idle_ids(&provider), vec![0]);
    assert!(provider.idle_facades().all(|f| f.branch().is_none()));

    provider.start(&xid(2)).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::Start, &xid(2)), vec![0]);
    assert_eq!(factory.created(), 1);
}

#[test]
fn commit_after_failed_prepare_frees_facade() {
    let (mut provider, factory) = open_provider();
    provider.start(&xid(1)).unwrap();
    factory.fail_next(FacadeCall::EndAndPrepare, 1);
    assert!(provider.end_and_prepare(&xid(1)).is_err());

    let err = provider.commit(&xid(1), false).unwrap_err();
    match &err {
        PoolError::Transient { action, source, .. } => {
            assert_eq!(*action, BranchAction::Commit);
            assert_eq!(source.xa_code(), Some(XAER_PROTO));
        }
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert_eq!(provider.mapped_count(), 0);
    assert!(provider.idle_facades().all(|f| f.branch().is_none()));

    provider.start(&xid(2)).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::Start, &xid(2)), vec![0]);
}

// === Finalization ===

#[test]
fn transient_commit_failure_recycles_facade() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);
    prepare(&mut provider, 2);
    factory.fail_next(FacadeCall::Commit, 1);

    let err = provider.commit(&xid(1), false).unwrap_err();
    assert!(err.is_retryable());
    match &err {
        PoolError::Transient { action, xid: failed, source } => {
            assert_eq!(*action, BranchAction::Commit);
            assert_eq!(failed.as_ref(), Some(&xid(1)));
            assert_eq!(source.xa_code(), Some(XAER_RMFAIL));
        }
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert_eq!(idle_ids(&provider), vec![0]);
    assert_eq!(provider.mapped_branches(), vec![xid(2)]);

    // Retrying finds no mapping and finalizes through the idle head
    provider.commit(&xid(1), false).unwrap();
    assert_eq!(factory.facades_for(FacadeCall::Commit, &xid(1)), vec![0, 0]);
    assert_eq!(idle_ids(&provider), vec![0]);

    let stats = provider.stats();
    assert_eq!(stats.transient_failures, 1);
    assert_eq!(stats.unmapped_finalizations, 1);
    assert_eq!(stats.branches_committed, 1);
}

#[test]
fn transient_rollback_failures() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);
    prepare(&mut provider, 2);
    factory.fail_next(FacadeCall::Rollback, 1);
    factory.fail_next(FacadeCall::FailAndRollback, 1);

    let err = provider.rollback(&xid(1)).unwrap_err();
    assert!(matches!(
        err,
        PoolError::Transient {
            action: BranchAction::Rollback,
            ..
        }
    ));
    let err = provider.fail_and_rollback(&xid(2)).unwrap_err();
    assert!(matches!(
        err,
        PoolError::Transient {
            action: BranchAction::FailAndRollback,
            ..
        }
    ));

    assert_eq!(idle_ids(&provider), vec![0, 1]);
    assert_eq!(provider.mapped_count(), 0);
    assert_eq!(factory.prepared(), vec![xid(1), xid(2)]);
}

#[test]
fn unknown_branch_commit_is_transient() {
    let (mut provider, _) = open_provider();

    let err = provider.commit(&xid(5), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.to_string().contains("commit"));
    assert_eq!(provider.idle_count(), 1);
}

#[test]
fn unmapped_finalize_creation_failure() {
    let (mut provider, factory) = open_provider();
    factory.fail_next(FacadeCall::Create, 1);

    let err = provider.rollback(&xid(5)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceCreation);
    assert!(!err.is_retryable());
    assert!(factory.calls_of(FacadeCall::Rollback).is_empty());
}

#[test]
fn recover_failure_is_transient() {
    let (mut provider, factory) = open_provider();
    factory.fail_next(FacadeCall::Recover, 1);

    let err = provider.recover().unwrap_err();
    assert!(matches!(
        err,
        PoolError::Transient {
            action: BranchAction::Recover,
            xid: None,
            ..
        }
    ));
    assert_eq!(provider.idle_count(), 1);
    assert!(provider.recover().unwrap().is_empty());
    assert_eq!(factory.created(), 1);
}

// === Shutdown ===

#[test]
fn close_attempts_every_facade() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);
    prepare(&mut provider, 2);
    provider.commit(&xid(2), false).unwrap();
    provider.start(&xid(3)).unwrap();
    provider.recover().unwrap();
    factory.fail_next(FacadeCall::Close, 2);

    let err = provider.close().unwrap_err();
    match &err {
        PoolError::CloseFailed { total, failures } => {
            assert_eq!(*total, 3);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("expected close failure, got {other:?}"),
    }
    assert_eq!(err.to_string(), "failed to close 2 of 3 facades");
    assert_eq!(factory.calls_of(FacadeCall::Close).len(), 3);
    assert!(!provider.is_initialized());

    provider.close().unwrap();
    assert_eq!(factory.calls_of(FacadeCall::Close).len(), 3);
}

#[test]
fn reopen_ignores_close_failures() {
    let (mut provider, factory) = open_provider();
    prepare(&mut provider, 1);
    factory.fail_next(FacadeCall::Close, 1);

    provider.open().unwrap();
    assert!(provider.is_initialized());
    assert_eq!(provider.mapped_count(), 0);
}
