//! Pooling XA provider.

use crate::error::{BranchAction, PoolError, PoolResult};
use crate::pool::PoolState;
use crate::stats::{PoolStats, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use xapool_facade::{
    FacadeError, FacadeFactory, FacadeResult, InMemoryFacadeFactory, InMemoryResourceManager,
    XaConfig, XaFacade, Xid,
};

/// The data connection type exposed by the facades of factory `F`.
pub type ConnectionOf<F> = <<F as FacadeFactory>::Facade as XaFacade>::Connection;

/// Multiplexes XA branches over a pool of one-branch-per-connection facades.
///
/// Some drivers bind a physical connection to a single XA branch until that
/// branch is committed or rolled back. This provider hides that limit: each
/// `start` takes an idle facade (or creates one), and the facade stays bound
/// to its branch through prepare until the branch is finalized, at which
/// point it goes back to the idle queue.
///
/// ## Single Active Branch
///
/// Only one branch can be active (between `start` and `end_and_prepare`) at
/// a time. Any number of branches may be prepared and awaiting finalization.
///
/// ## Threading
///
/// The provider is not synchronized. It expects one coordinator to drive it
/// sequentially; share it behind a lock if needed.
///
/// ## Persistence
///
/// Serializing a provider keeps only its factory. The idle queue and branch
/// map are process-local: a deserialized provider is closed, and after
/// `open()` it starts empty. Branches prepared before a restart are found
/// through [`recover`](PoolingXaProvider::recover) and finalized through
/// any idle facade.
///
/// # Example
///
/// ```rust
/// use xapool_core::PoolingXaProvider;
/// use xapool_facade::{InMemoryResourceManager, XaConfig, Xid};
///
/// let manager = InMemoryResourceManager::new();
/// let mut provider = PoolingXaProvider::in_memory(XaConfig::new("orders"), manager.clone());
/// provider.open().unwrap();
///
/// let first = Xid::generate(1, 0);
/// provider.start(&first).unwrap();
/// provider.end_and_prepare(&first).unwrap();
///
/// // The first connection is still holding its prepared branch.
/// let second = Xid::generate(1, 1);
/// provider.start(&second).unwrap();
/// provider.end_and_prepare(&second).unwrap();
/// assert_eq!(manager.connections_opened(), 2);
///
/// provider.commit(&first, false).unwrap();
/// provider.commit(&second, false).unwrap();
/// assert_eq!(provider.idle_count(), 2);
/// provider.close().unwrap();
/// ```
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))]
pub struct PoolingXaProvider<F: FacadeFactory> {
    /// Produces new facades; the only persisted part.
    factory: F,
    /// Idle queue, branch map and active slot (`None` while closed).
    #[serde(skip)]
    state: Option<PoolState<F::Facade>>,
    #[serde(skip)]
    stats: PoolStats,
}

impl<F: FacadeFactory> PoolingXaProvider<F> {
    /// Creates a closed provider drawing facades from `factory`.
    pub fn from_factory(factory: F) -> Self {
        Self {
            factory,
            state: None,
            stats: PoolStats::new(),
        }
    }

    /// Returns the facade factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Returns the facade factory mutably, e.g. to reattach live resources
    /// after deserialization.
    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    /// Returns a snapshot of the pool statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // === Lifecycle ===

    /// Initializes an empty idle queue and branch map.
    ///
    /// Re-opening a provider that was used before closes every facade it
    /// still holds (close failures are logged, not returned) and starts over
    /// with empty structures.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StateViolation`] if a branch is active.
    pub fn open(&mut self) -> PoolResult<()> {
        if let Some(active) = self.state.as_ref().and_then(|state| state.active()) {
            return Err(PoolError::state_violation(format!(
                "cannot open: branch {active} is active"
            )));
        }
        if let Some(previous) = self.state.take() {
            let (total, failures) = close_facades(previous);
            if total > 0 {
                warn!(total, failed = failures.len(), "discarded facades left from earlier use");
            }
        }
        self.state = Some(PoolState::new());
        info!("pooling XA provider opened");
        Ok(())
    }

    /// Returns true if a branch is active and its facade's connection is open.
    pub fn is_open(&self) -> bool {
        self.state
            .as_ref()
            .and_then(|state| state.active_facade())
            .is_some_and(|facade| facade.is_open())
    }

    /// Returns true between [`open`](Self::open) and [`close`](Self::close).
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Closes every facade: bound to a branch, idle, or active.
    ///
    /// Every facade is attempted even if some fail; the provider is closed
    /// afterwards in either case. Closing a closed provider does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::CloseFailed`] carrying every close failure.
    pub fn close(&mut self) -> PoolResult<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        let (total, failures) = close_facades(state);
        info!(total, failed = failures.len(), "pooling XA provider closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::CloseFailed { total, failures })
        }
    }

    // === Branch start/end ===

    /// Starts a branch on an idle facade, creating one if none is idle.
    ///
    /// # Errors
    ///
    /// - [`PoolError::StateViolation`] if the provider is not open, a branch
    ///   is already active, or `xid` is already bound to a facade
    /// - [`PoolError::ResourceCreation`] if a new facade cannot be created
    ///   or opened
    /// - [`PoolError::Resource`] if the facade rejects the branch; that
    ///   facade is closed and dropped, not pooled
    pub fn start(&mut self, xid: &Xid) -> PoolResult<()> {
        let factory = &self.factory;
        let stats = &self.stats;
        let state = self.state.as_mut().ok_or_else(not_open)?;

        if let Some(active) = state.active() {
            return Err(PoolError::state_violation(format!(
                "cannot start {xid}: branch {active} is still active"
            )));
        }
        if state.is_mapped(xid) {
            return Err(PoolError::state_violation(format!(
                "cannot start {xid}: branch is already bound to a facade"
            )));
        }

        let mut facade = match state.take_idle() {
            Some(facade) => facade,
            None => create_facade(factory, stats)?,
        };

        if let Err(err) = facade.start(xid) {
            warn!(%xid, error = %err, "failed to start branch, discarding facade");
            if let Err(close_err) = facade.close() {
                debug!(%xid, error = %close_err, "failed to close discarded facade");
            }
            stats.record_facade_discarded();
            return Err(err.into());
        }

        state.bind_active(xid.clone(), facade);
        stats.record_branch_started();
        debug!(%xid, idle = state.idle_len(), mapped = state.mapped_len(), "branch started");
        Ok(())
    }

    /// Ends and prepares the active branch.
    ///
    /// Must be called after [`start`](Self::start) with the same `xid`. The
    /// active slot is cleared whether or not the facade call succeeds; the
    /// facade stays bound to the branch until it is finalized.
    ///
    /// # Errors
    ///
    /// - [`PoolError::StateViolation`] if `xid` is not the active branch
    /// - [`PoolError::Resource`] if the facade fails to end or prepare
    pub fn end_and_prepare(&mut self, xid: &Xid) -> PoolResult<()> {
        let state = self.state.as_mut().ok_or_else(not_open)?;

        match state.active() {
            Some(active) if active == xid => {}
            Some(active) => {
                return Err(PoolError::state_violation(format!(
                    "cannot end {xid}: active branch is {active}"
                )))
            }
            None => {
                return Err(PoolError::state_violation(format!(
                    "cannot end {xid}: no branch is active"
                )))
            }
        }

        let result = match state.active_facade_mut() {
            Some(facade) => facade.end_and_prepare(xid).map_err(PoolError::from),
            None => Err(PoolError::state_violation(format!(
                "active branch {xid} has no facade"
            ))),
        };
        state.clear_active();
        result?;

        self.stats.record_branch_prepared();
        debug!(%xid, "branch prepared");
        Ok(())
    }

    // === Branch finalization ===

    /// Commits a prepared branch.
    ///
    /// XA itself puts no precondition on committing a branch. This provider
    /// additionally refuses the active branch, whose facade is still bound
    /// and must not go back to the idle queue; a branch whose
    /// `end_and_prepare` failed is no longer active and is accepted.
    ///
    /// # Errors
    ///
    /// - [`PoolError::StateViolation`] if `xid` is the active branch; end
    ///   it first, or use [`fail_and_rollback`](Self::fail_and_rollback)
    /// - [`PoolError::Transient`] if the commit fails; the facade has been
    ///   returned to the idle queue and the call may be retried
    /// - [`PoolError::ResourceCreation`] if the branch is unknown here and
    ///   no facade could be created to finalize it
    pub fn commit(&mut self, xid: &Xid, ignore_unknown: bool) -> PoolResult<()> {
        self.ensure_not_active(xid, BranchAction::Commit)?;
        self.run_for_xid(xid, BranchAction::Commit, |facade| {
            facade.commit(xid, ignore_unknown)
        })?;
        self.stats.record_branch_committed();
        Ok(())
    }

    /// Rolls back a prepared branch.
    ///
    /// Refuses the active branch like [`commit`](Self::commit) does.
    ///
    /// # Errors
    ///
    /// Same as [`commit`](Self::commit).
    pub fn rollback(&mut self, xid: &Xid) -> PoolResult<()> {
        self.ensure_not_active(xid, BranchAction::Rollback)?;
        self.run_for_xid(xid, BranchAction::Rollback, |facade| facade.rollback(xid))?;
        self.stats.record_branch_rolled_back();
        Ok(())
    }

    /// Marks a branch failed and rolls it back.
    ///
    /// Also accepts the active branch, which frees the active slot.
    ///
    /// # Errors
    ///
    /// Same as [`commit`](Self::commit).
    pub fn fail_and_rollback(&mut self, xid: &Xid) -> PoolResult<()> {
        self.run_for_xid(xid, BranchAction::FailAndRollback, |facade| {
            facade.fail_and_rollback(xid)
        })?;
        self.stats.record_branch_rolled_back();
        Ok(())
    }

    /// Returns the branches the resource manager holds as prepared.
    ///
    /// Runs through an idle facade, creating one if needed, so it works
    /// right after a restart before any branch was started.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Transient`] if the recovery scan fails
    /// - [`PoolError::ResourceCreation`] if no facade could be created
    pub fn recover(&mut self) -> PoolResult<Vec<Xid>> {
        let factory = &self.factory;
        let stats = &self.stats;
        let state = self.state.as_mut().ok_or_else(not_open)?;

        let facade = state.peek_idle_or_insert_with(|| create_facade(factory, stats))?;
        let xids = facade.recover().map_err(|source| {
            stats.record_transient_failure();
            warn!(error = %source, "recovery scan failed");
            PoolError::transient(BranchAction::Recover, None, source)
        })?;

        stats.record_recovery();
        info!(count = xids.len(), "recovered prepared branches");
        Ok(xids)
    }

    fn ensure_not_active(&self, xid: &Xid, action: BranchAction) -> PoolResult<()> {
        if self.active_branch() == Some(xid) {
            return Err(PoolError::state_violation(format!(
                "cannot {action} {xid}: branch is still active"
            )));
        }
        Ok(())
    }

    // `action` must leave the facade idle: it may not start, end or prepare
    // a branch.
    fn run_for_xid<A>(&mut self, xid: &Xid, action: BranchAction, run: A) -> PoolResult<()>
    where
        A: FnOnce(&mut F::Facade) -> FacadeResult<()>,
    {
        let factory = &self.factory;
        let stats = &self.stats;
        let state = self.state.as_mut().ok_or_else(not_open)?;

        let result = match state.unbind(xid) {
            Some(mut facade) => {
                debug!(%xid, %action, "found facade mapped to branch");
                let result = run(&mut facade);
                state.offer_idle(facade);
                result
            }
            None => {
                // Unknown branches are normal during recovery.
                debug!(%xid, %action, "no facade mapped to branch, using an idle one");
                stats.record_unmapped_finalization();
                let facade = state.peek_idle_or_insert_with(|| create_facade(factory, stats))?;
                run(facade)
            }
        };

        result.map_err(|source| {
            stats.record_transient_failure();
            warn!(%xid, %action, error = %source, "branch finalization failed");
            PoolError::transient(action, Some(xid.clone()), source)
        })
    }

    // === Data-access passthroughs ===

    /// Returns the active facade's data connection, if established.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoActiveBranch`] if no branch is active.
    pub fn connection(&self) -> PoolResult<Option<&ConnectionOf<F>>> {
        Ok(self.active_facade("connection")?.connection())
    }

    /// Checks the active facade's data connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoActiveBranch`] if no branch is active, or
    /// [`PoolError::Resource`] if the check fails.
    pub fn is_connection_valid(&self) -> PoolResult<bool> {
        Ok(self.active_facade("is_connection_valid")?.is_connection_valid()?)
    }

    /// Returns the active facade's data connection, establishing it first.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoActiveBranch`] if no branch is active, or
    /// [`PoolError::Resource`] if the connection cannot be established.
    pub fn get_or_establish_connection(&mut self) -> PoolResult<&ConnectionOf<F>> {
        Ok(self
            .active_facade_mut("get_or_establish_connection")?
            .get_or_establish_connection()?)
    }

    /// Drops the active facade's data connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoActiveBranch`] if no branch is active.
    pub fn close_connection(&mut self) -> PoolResult<()> {
        self.active_facade_mut("close_connection")?.close_connection();
        Ok(())
    }

    /// Replaces the active facade's data connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoActiveBranch`] if no branch is active, or
    /// [`PoolError::Resource`] if the connection cannot be established.
    pub fn reestablish_connection(&mut self) -> PoolResult<&ConnectionOf<F>> {
        Ok(self
            .active_facade_mut("reestablish_connection")?
            .reestablish_connection()?)
    }

    fn active_facade(&self, operation: &'static str) -> PoolResult<&F::Facade> {
        self.state
            .as_ref()
            .and_then(|state| state.active_facade())
            .ok_or(PoolError::NoActiveBranch { operation })
    }

    fn active_facade_mut(&mut self, operation: &'static str) -> PoolResult<&mut F::Facade> {
        self.state
            .as_mut()
            .and_then(|state| state.active_facade_mut())
            .ok_or(PoolError::NoActiveBranch { operation })
    }

    // === Introspection ===

    /// Returns the active branch, if any.
    pub fn active_branch(&self) -> Option<&Xid> {
        self.state.as_ref().and_then(|state| state.active())
    }

    /// Returns the number of idle facades.
    pub fn idle_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.idle_len())
    }

    /// Returns the number of facades bound to a branch.
    pub fn mapped_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.mapped_len())
    }

    /// Returns the branches currently bound to a facade, in XID order.
    pub fn mapped_branches(&self) -> Vec<Xid> {
        let mut xids: Vec<Xid> = self
            .state
            .iter()
            .flat_map(|state| state.mapped_branches().cloned())
            .collect();
        xids.sort();
        xids
    }

    /// Returns the facade bound to `xid`.
    pub fn mapped_facade(&self, xid: &Xid) -> Option<&F::Facade> {
        self.state.as_ref().and_then(|state| state.mapped_facade(xid))
    }

    /// Returns the idle facades, next to be reused first.
    pub fn idle_facades(&self) -> impl Iterator<Item = &F::Facade> {
        self.state.iter().flat_map(|state| state.idle_iter())
    }
}

impl PoolingXaProvider<InMemoryFacadeFactory> {
    /// Creates a closed provider over an in-memory resource manager.
    pub fn in_memory(config: XaConfig, manager: InMemoryResourceManager) -> Self {
        Self::from_factory(InMemoryFacadeFactory::with_manager(config, manager))
    }
}

impl<F> fmt::Debug for PoolingXaProvider<F>
where
    F: FacadeFactory + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolingXaProvider")
            .field("factory", &self.factory)
            .field("initialized", &self.is_initialized())
            .field("active", &self.active_branch())
            .field("idle", &self.idle_count())
            .field("mapped", &self.mapped_count())
            .finish()
    }
}

fn not_open() -> PoolError {
    PoolError::state_violation("provider is not open")
}

fn create_facade<F: FacadeFactory>(factory: &F, stats: &PoolStats) -> PoolResult<F::Facade> {
    let mut facade = factory.create().map_err(PoolError::ResourceCreation)?;
    facade.open().map_err(PoolError::ResourceCreation)?;
    stats.record_facade_created();
    debug!("created and opened a new facade");
    Ok(facade)
}

fn close_facades<T: XaFacade>(state: PoolState<T>) -> (usize, Vec<FacadeError>) {
    let mut total = 0;
    let mut failures = Vec::new();
    for mut facade in state.into_facades() {
        total += 1;
        if let Err(err) = facade.close() {
            warn!(error = %err, "failed to close facade");
            failures.push(err);
        }
    }
    (total, failures)
}
