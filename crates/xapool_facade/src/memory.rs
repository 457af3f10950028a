//! In-memory resource manager and facade.
//!
//! Simulates a data store whose driver allows a single XA branch per
//! connection. Used by tests, the CLI and anyone who needs a facade
//! without a database.

use crate::config::XaConfig;
use crate::error::{FacadeError, FacadeResult, XAER_DUPID, XAER_PROTO};
use crate::facade::XaFacade;
use crate::factory::FacadeFactory;
use crate::xid::Xid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a branch was resolved by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchOutcome {
    /// The branch was committed.
    Committed,
    /// The branch was rolled back.
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchPhase {
    Active,
    Prepared,
}

#[derive(Debug, Clone)]
struct BranchEntry {
    phase: BranchPhase,
    timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct ManagerState {
    branches: HashMap<Xid, BranchEntry>,
    outcomes: Vec<(Xid, BranchOutcome)>,
    unavailable: bool,
    connections_opened: u64,
    next_connection_id: u64,
}

/// A simulated resource manager shared by every facade connected to it.
///
/// Cloning yields another handle to the same manager, so branches prepared
/// through one facade are visible to every other one. This is what lets a
/// prepared branch be finalized (or recovered) through any connection.
///
/// # Example
///
/// ```rust
/// use xapool_facade::{InMemoryFacade, InMemoryResourceManager, XaConfig, XaFacade, Xid};
///
/// let manager = InMemoryResourceManager::new();
/// let mut first = InMemoryFacade::new(XaConfig::default(), manager.clone());
/// let mut second = InMemoryFacade::new(XaConfig::default(), manager.clone());
/// first.open().unwrap();
/// second.open().unwrap();
///
/// let xid = Xid::generate(1, 0);
/// first.start(&xid).unwrap();
/// first.end_and_prepare(&xid).unwrap();
///
/// // Any connection can finish the branch.
/// second.commit(&xid, false).unwrap();
/// assert!(manager.prepared().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceManager {
    state: Arc<Mutex<ManagerState>>,
}

impl InMemoryResourceManager {
    /// Creates a new, empty resource manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the prepared branches awaiting resolution, in XID order.
    #[must_use]
    pub fn prepared(&self) -> Vec<Xid> {
        let state = self.state.lock();
        let mut xids: Vec<Xid> = state
            .branches
            .iter()
            .filter(|(_, entry)| entry.phase == BranchPhase::Prepared)
            .map(|(xid, _)| xid.clone())
            .collect();
        xids.sort();
        xids
    }

    /// Returns true if the branch has been started and not yet ended.
    #[must_use]
    pub fn is_active(&self, xid: &Xid) -> bool {
        self.state
            .lock()
            .branches
            .get(xid)
            .is_some_and(|entry| entry.phase == BranchPhase::Active)
    }

    /// Returns how the branch was resolved, if it was.
    #[must_use]
    pub fn outcome(&self, xid: &Xid) -> Option<BranchOutcome> {
        self.state
            .lock()
            .outcomes
            .iter()
            .rev()
            .find(|(resolved, _)| resolved == xid)
            .map(|(_, outcome)| *outcome)
    }

    /// Returns every resolution in the order it happened.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(Xid, BranchOutcome)> {
        self.state.lock().outcomes.clone()
    }

    /// Returns the timeout a branch was started with.
    #[must_use]
    pub fn branch_timeout(&self, xid: &Xid) -> Option<Duration> {
        self.state
            .lock()
            .branches
            .get(xid)
            .and_then(|entry| entry.timeout)
    }

    /// Makes every subsequent call fail with `XAER_RMFAIL` (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Returns the number of physical connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().connections_opened
    }

    fn check_available(state: &ManagerState) -> FacadeResult<()> {
        if state.unavailable {
            Err(FacadeError::Unavailable(
                "resource manager not reachable".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn is_available(&self) -> bool {
        !self.state.lock().unavailable
    }

    fn scan_prepared(&self) -> FacadeResult<Vec<Xid>> {
        Self::check_available(&self.state.lock())?;
        Ok(self.prepared())
    }

    fn connect(&self) -> FacadeResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.connections_opened += 1;
        Ok(())
    }

    fn next_connection_id(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_connection_id += 1;
        state.next_connection_id
    }

    fn begin(&self, xid: &Xid, timeout: Option<Duration>) -> FacadeResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        if state.branches.contains_key(xid) {
            return Err(FacadeError::xa(
                XAER_DUPID,
                format!("branch {xid} already exists"),
            ));
        }
        state.branches.insert(
            xid.clone(),
            BranchEntry {
                phase: BranchPhase::Active,
                timeout,
            },
        );
        Ok(())
    }

    fn prepare(&self, xid: &Xid) -> FacadeResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        match state.branches.get_mut(xid) {
            Some(entry) if entry.phase == BranchPhase::Active => {
                entry.phase = BranchPhase::Prepared;
                Ok(())
            }
            Some(_) => Err(FacadeError::xa(
                XAER_PROTO,
                format!("branch {xid} already prepared"),
            )),
            None => Err(FacadeError::UnknownBranch { xid: xid.clone() }),
        }
    }

    fn commit(&self, xid: &Xid, ignore_unknown: bool) -> FacadeResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        match state.branches.get(xid).map(|entry| entry.phase) {
            Some(BranchPhase::Prepared) => {
                state.branches.remove(xid);
                state.outcomes.push((xid.clone(), BranchOutcome::Committed));
                Ok(())
            }
            Some(BranchPhase::Active) => Err(FacadeError::xa(
                XAER_PROTO,
                format!("branch {xid} is not prepared"),
            )),
            None if ignore_unknown => Ok(()),
            None => Err(FacadeError::UnknownBranch { xid: xid.clone() }),
        }
    }

    fn rollback(&self, xid: &Xid, allow_active: bool) -> FacadeResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        match state.branches.get(xid).map(|entry| entry.phase) {
            Some(BranchPhase::Active) if !allow_active => Err(FacadeError::xa(
                XAER_PROTO,
                format!("branch {xid} is still active"),
            )),
            Some(_) => {
                state.branches.remove(xid);
                state.outcomes.push((xid.clone(), BranchOutcome::RolledBack));
                Ok(())
            }
            None => Err(FacadeError::UnknownBranch { xid: xid.clone() }),
        }
    }

    // A dropped connection takes its unprepared work with it.
    fn abort_active(&self, xid: &Xid) {
        let mut state = self.state.lock();
        if state
            .branches
            .get(xid)
            .is_some_and(|entry| entry.phase == BranchPhase::Active)
        {
            state.branches.remove(xid);
            state.outcomes.push((xid.clone(), BranchOutcome::RolledBack));
        }
    }
}

/// A data connection handed out by an [`InMemoryFacade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryConnection {
    /// Connection id, unique per resource manager.
    pub id: u64,
    /// Name of the resource manager.
    pub resource: String,
}

/// A simulated XA connection limited to one branch at a time.
#[derive(Debug)]
pub struct InMemoryFacade {
    config: XaConfig,
    manager: InMemoryResourceManager,
    open: bool,
    bound: Option<Xid>,
    connection: Option<InMemoryConnection>,
}

impl InMemoryFacade {
    /// Creates a closed facade connected to `manager`.
    #[must_use]
    pub fn new(config: XaConfig, manager: InMemoryResourceManager) -> Self {
        Self {
            config,
            manager,
            open: false,
            bound: None,
            connection: None,
        }
    }

    /// Returns the branch currently bound to this facade.
    #[must_use]
    pub fn bound_branch(&self) -> Option<&Xid> {
        self.bound.as_ref()
    }

    /// Returns the resource manager this facade talks to.
    #[must_use]
    pub fn manager(&self) -> &InMemoryResourceManager {
        &self.manager
    }

    fn ensure_open(&self) -> FacadeResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FacadeError::Closed)
        }
    }

    // Drops the association with `xid`, discarding its unended work.
    fn release(&mut self, xid: &Xid) -> bool {
        if self.bound.as_ref() != Some(xid) {
            return false;
        }
        self.bound = None;
        self.manager.abort_active(xid);
        true
    }

    fn new_connection(&self) -> InMemoryConnection {
        InMemoryConnection {
            id: self.manager.next_connection_id(),
            resource: self.config.resource_name.clone(),
        }
    }
}

impl XaFacade for InMemoryFacade {
    type Connection = InMemoryConnection;

    fn open(&mut self) -> FacadeResult<()> {
        if self.open {
            return Ok(());
        }
        self.manager.connect()?;
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> FacadeResult<()> {
        if let Some(xid) = self.bound.take() {
            self.manager.abort_active(&xid);
        }
        self.connection = None;
        self.open = false;
        Ok(())
    }

    fn start(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.ensure_open()?;
        if let Some(bound) = &self.bound {
            return Err(FacadeError::ConnectionBusy {
                bound: bound.clone(),
                requested: xid.clone(),
            });
        }
        self.manager.begin(xid, self.config.transaction_timeout)?;
        self.bound = Some(xid.clone());
        Ok(())
    }

    fn end_and_prepare(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.ensure_open()?;
        if self.bound.as_ref() != Some(xid) {
            return Err(FacadeError::protocol(format!(
                "branch {xid} is not bound to this connection"
            )));
        }
        self.manager.prepare(xid)?;
        self.bound = None;
        Ok(())
    }

    fn commit(&mut self, xid: &Xid, ignore_unknown: bool) -> FacadeResult<()> {
        self.ensure_open()?;
        if self.release(xid) {
            return Err(FacadeError::protocol(format!(
                "branch {xid} was never ended and has been rolled back"
            )));
        }
        self.manager.commit(xid, ignore_unknown)
    }

    fn rollback(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.ensure_open()?;
        if self.release(xid) {
            return Ok(());
        }
        self.manager.rollback(xid, false)
    }

    fn fail_and_rollback(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.ensure_open()?;
        let was_bound = self.bound.as_ref() == Some(xid);
        if was_bound {
            self.bound = None;
        }
        match self.manager.rollback(xid, was_bound) {
            Err(FacadeError::UnknownBranch { .. }) => Ok(()),
            other => other,
        }
    }

    fn recover(&mut self) -> FacadeResult<Vec<Xid>> {
        self.ensure_open()?;
        self.manager.scan_prepared()
    }

    fn connection(&self) -> Option<&InMemoryConnection> {
        self.connection.as_ref()
    }

    fn is_connection_valid(&self) -> FacadeResult<bool> {
        Ok(self.open && self.connection.is_some() && self.manager.is_available())
    }

    fn get_or_establish_connection(&mut self) -> FacadeResult<&InMemoryConnection> {
        self.ensure_open()?;
        if self.connection.is_none() {
            self.connection = Some(self.new_connection());
        }
        self.connection.as_ref().ok_or(FacadeError::Closed)
    }

    fn close_connection(&mut self) {
        self.connection = None;
    }

    fn reestablish_connection(&mut self) -> FacadeResult<&InMemoryConnection> {
        self.ensure_open()?;
        let connection = self.new_connection();
        Ok(&*self.connection.insert(connection))
    }
}

/// Factory producing [`InMemoryFacade`]s for one resource manager.
///
/// Only the [`XaConfig`] is serialized. After deserializing, call
/// [`attach`](InMemoryFacadeFactory::attach) to reconnect the factory to a
/// live manager; until then it points at a fresh, empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryFacadeFactory {
    config: XaConfig,
    #[serde(skip)]
    manager: InMemoryResourceManager,
}

impl InMemoryFacadeFactory {
    /// Creates a factory with its own fresh resource manager.
    #[must_use]
    pub fn new(config: XaConfig) -> Self {
        Self::with_manager(config, InMemoryResourceManager::new())
    }

    /// Creates a factory for an existing resource manager.
    #[must_use]
    pub fn with_manager(config: XaConfig, manager: InMemoryResourceManager) -> Self {
        Self { config, manager }
    }

    /// Reconnects the factory to a resource manager.
    pub fn attach(&mut self, manager: InMemoryResourceManager) {
        self.manager = manager;
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &XaConfig {
        &self.config
    }

    /// Returns the resource manager new facades connect to.
    #[must_use]
    pub fn manager(&self) -> &InMemoryResourceManager {
        &self.manager
    }
}

impl FacadeFactory for InMemoryFacadeFactory {
    type Facade = InMemoryFacade;

    fn create(&self) -> FacadeResult<InMemoryFacade> {
        Ok(InMemoryFacade::new(
            self.config.clone(),
            self.manager.clone(),
        ))
    }
}
