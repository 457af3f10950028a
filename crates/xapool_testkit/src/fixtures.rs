//! Test fixtures: branch ids and a recording facade.
//!
//! [`RecordingFactory`] hands out [`RecordingFacade`]s that share one call
//! log, one registry of prepared branches and one set of injected faults.
//! Facades enforce the one-branch-per-connection rule, so any pool bug that
//! hands a bound facade to a new branch shows up as a `ConnectionBusy`
//! error.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use xapool_facade::{FacadeError, FacadeFactory, FacadeResult, XaFacade, Xid, XAER_RMFAIL};

/// Format id used by [`xid`].
pub const TEST_FORMAT_ID: i32 = 0x5841;

/// Returns the test branch id number `n`.
///
/// Equal `n` always yields equal ids.
pub fn xid(n: u32) -> Xid {
    Xid::new(TEST_FORMAT_ID, format!("gtrid-{n}").into_bytes(), vec![1])
        .expect("test xid within size limits")
}

/// A facade or factory call recorded by the testkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacadeCall {
    /// `FacadeFactory::create`
    Create,
    /// `XaFacade::open`
    Open,
    /// `XaFacade::close`
    Close,
    /// `XaFacade::start`
    Start,
    /// `XaFacade::end_and_prepare`
    EndAndPrepare,
    /// `XaFacade::commit`
    Commit,
    /// `XaFacade::rollback`
    Rollback,
    /// `XaFacade::fail_and_rollback`
    FailAndRollback,
    /// `XaFacade::recover`
    Recover,
}

impl fmt::Display for FacadeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of the shared call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Id of the facade the call went to (the new facade's id for `Create`).
    pub facade: usize,
    /// The call.
    pub call: FacadeCall,
    /// The branch argument, if the call takes one.
    pub xid: Option<Xid>,
}

#[derive(Debug, Default)]
struct Shared {
    log: Vec<CallRecord>,
    faults: HashMap<FacadeCall, usize>,
    prepared: BTreeSet<Xid>,
    next_id: usize,
}

impl Shared {
    // Logs the call, then consumes one injected fault for it if any is left.
    fn record(&mut self, facade: usize, call: FacadeCall, xid: Option<&Xid>) -> FacadeResult<()> {
        self.log.push(CallRecord {
            facade,
            call,
            xid: xid.cloned(),
        });
        match self.faults.get_mut(&call) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(FacadeError::xa(XAER_RMFAIL, format!("injected {call} failure")))
            }
            _ => Ok(()),
        }
    }
}

/// Factory producing [`RecordingFacade`]s.
///
/// Clones share the same log, faults and prepared registry. Only the name
/// is serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingFactory {
    name: String,
    #[serde(skip)]
    shared: Arc<Mutex<Shared>>,
}

impl RecordingFactory {
    /// Creates a factory with an empty log and no faults.
    pub fn new() -> Self {
        Self::named("recording")
    }

    /// Creates a factory with a name that survives serialization.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::default(),
        }
    }

    /// Returns the factory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the next `times` calls of `call` fail with `XAER_RMFAIL`.
    pub fn fail_next(&self, call: FacadeCall, times: usize) {
        *self.shared.lock().faults.entry(call).or_insert(0) += times;
    }

    /// Drops every pending injected fault.
    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// Returns the full call log.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.shared.lock().log.clone()
    }

    /// Returns the logged calls of one kind.
    pub fn calls_of(&self, call: FacadeCall) -> Vec<CallRecord> {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|record| record.call == call)
            .cloned()
            .collect()
    }

    /// Returns the facade ids that received `call` for `xid`, in order.
    pub fn facades_for(&self, call: FacadeCall, xid: &Xid) -> Vec<usize> {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|record| record.call == call && record.xid.as_ref() == Some(xid))
            .map(|record| record.facade)
            .collect()
    }

    /// Empties the call log.
    pub fn clear_calls(&self) {
        self.shared.lock().log.clear();
    }

    /// Returns the number of facades created so far.
    pub fn created(&self) -> usize {
        self.shared.lock().next_id
    }

    /// Returns the prepared branches not yet finalized, in XID order.
    pub fn prepared(&self) -> Vec<Xid> {
        self.shared.lock().prepared.iter().cloned().collect()
    }

    /// Registers a branch as prepared, as if by an earlier process.
    pub fn seed_prepared(&self, xid: Xid) {
        self.shared.lock().prepared.insert(xid);
    }
}

impl FacadeFactory for RecordingFactory {
    type Facade = RecordingFacade;

    fn create(&self) -> FacadeResult<RecordingFacade> {
        let mut shared = self.shared.lock();
        let id = shared.next_id;
        shared.record(id, FacadeCall::Create, None)?;
        shared.next_id += 1;
        Ok(RecordingFacade {
            id,
            shared: Arc::clone(&self.shared),
            open: false,
            branch: None,
            connection: None,
            generation: 0,
        })
    }
}

/// Data connection of a [`RecordingFacade`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingConnection {
    /// Id of the owning facade.
    pub facade: usize,
    /// Bumped on every (re)establish.
    pub generation: u32,
}

/// A facade that logs every call and tracks its own branch state.
#[derive(Debug)]
pub struct RecordingFacade {
    id: usize,
    shared: Arc<Mutex<Shared>>,
    open: bool,
    branch: Option<Xid>,
    connection: Option<RecordingConnection>,
    generation: u32,
}

impl RecordingFacade {
    /// Returns the facade id, unique per factory.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the branch started and not yet ended on this facade.
    pub fn branch(&self) -> Option<&Xid> {
        self.branch.as_ref()
    }

    fn record(&self, call: FacadeCall, xid: Option<&Xid>) -> FacadeResult<()> {
        self.shared.lock().record(self.id, call, xid)
    }

    fn ensure_open(&self) -> FacadeResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(FacadeError::Closed)
        }
    }

    // Finalizing the bound branch discards it, even when the call then fails.
    fn release(&mut self, xid: &Xid) -> bool {
        if self.branch.as_ref() == Some(xid) {
            self.branch = None;
            true
        } else {
            false
        }
    }

    fn establish(&mut self) -> &RecordingConnection {
        self.generation += 1;
        self.connection.insert(RecordingConnection {
            facade: self.id,
            generation: self.generation,
        })
    }
}

impl XaFacade for RecordingFacade {
    type Connection = RecordingConnection;

    fn open(&mut self) -> FacadeResult<()> {
        self.record(FacadeCall::Open, None)?;
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> FacadeResult<()> {
        self.record(FacadeCall::Close, None)?;
        self.open = false;
        self.branch = None;
        self.connection = None;
        Ok(())
    }

    fn start(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.record(FacadeCall::Start, Some(xid))?;
        self.ensure_open()?;
        if let Some(bound) = &self.branch {
            return Err(FacadeError::ConnectionBusy {
                bound: bound.clone(),
                requested: xid.clone(),
            });
        }
        self.branch = Some(xid.clone());
        Ok(())
    }

    fn end_and_prepare(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.record(FacadeCall::EndAndPrepare, Some(xid))?;
        self.ensure_open()?;
        if self.branch.as_ref() != Some(xid) {
            return Err(FacadeError::protocol(format!(
                "branch {xid} is not bound to facade {}",
                self.id
            )));
        }
        self.branch = None;
        self.shared.lock().prepared.insert(xid.clone());
        Ok(())
    }

    fn commit(&mut self, xid: &Xid, ignore_unknown: bool) -> FacadeResult<()> {
        let was_bound = self.release(xid);
        self.record(FacadeCall::Commit, Some(xid))?;
        self.ensure_open()?;
        if was_bound {
            return Err(FacadeError::protocol(format!(
                "branch {xid} was never ended and has been rolled back"
            )));
        }
        let known = self.shared.lock().prepared.remove(xid);
        if known || ignore_unknown {
            Ok(())
        } else {
            Err(FacadeError::UnknownBranch { xid: xid.clone() })
        }
    }

    fn rollback(&mut self, xid: &Xid) -> FacadeResult<()> {
        let was_bound = self.release(xid);
        self.record(FacadeCall::Rollback, Some(xid))?;
        self.ensure_open()?;
        if was_bound {
            return Ok(());
        }
        if self.shared.lock().prepared.remove(xid) {
            Ok(())
        } else {
            Err(FacadeError::UnknownBranch { xid: xid.clone() })
        }
    }

    fn fail_and_rollback(&mut self, xid: &Xid) -> FacadeResult<()> {
        self.release(xid);
        self.record(FacadeCall::FailAndRollback, Some(xid))?;
        self.ensure_open()?;
        self.shared.lock().prepared.remove(xid);
        Ok(())
    }

    fn recover(&mut self) -> FacadeResult<Vec<Xid>> {
        self.record(FacadeCall::Recover, None)?;
        self.ensure_open()?;
        Ok(self.shared.lock().prepared.iter().cloned().collect())
    }

    fn connection(&self) -> Option<&RecordingConnection> {
        self.connection.as_ref()
    }

    fn is_connection_valid(&self) -> FacadeResult<bool> {
        Ok(self.open && self.connection.is_some())
    }

    fn get_or_establish_connection(&mut self) -> FacadeResult<&RecordingConnection> {
        self.ensure_open()?;
        if self.connection.is_none() {
            self.establish();
        }
        self.connection.as_ref().ok_or(FacadeError::Closed)
    }

    fn close_connection(&mut self) {
        self.connection = None;
    }

    fn reestablish_connection(&mut self) -> FacadeResult<&RecordingConnection> {
        self.ensure_open()?;
        Ok(self.establish())
    }
}
