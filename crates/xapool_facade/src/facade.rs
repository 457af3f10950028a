//! Resource facade trait definition.

use crate::error::FacadeResult;
use crate::xid::Xid;

/// One physical connection able to take part in an XA transaction.
///
/// A facade has two orthogonal states: its connection is either closed or
/// open, and it is either idle, bound to an active branch (between
/// [`start`](XaFacade::start) and [`end_and_prepare`](XaFacade::end_and_prepare)),
/// or holding a prepared branch awaiting commit or rollback.
///
/// # Invariants
///
/// - At most one branch is bound to a facade at a time
/// - `commit`, `rollback` and `fail_and_rollback` leave the facade idle, whether
///   or not they succeed. Finalizing a branch that is still bound (for example
///   after a failed `end_and_prepare`) discards it
/// - A prepared branch can be finalized through any open facade of the same
///   resource manager, not only the one that prepared it
///
/// # Implementors
///
/// - [`super::InMemoryFacade`] - Simulated connection for tests and demos
pub trait XaFacade {
    /// The data connection handed out by the passthrough methods.
    type Connection;

    /// Opens the physical connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn open(&mut self) -> FacadeResult<()>;

    /// Returns true if the physical connection is open.
    fn is_open(&self) -> bool;

    /// Closes the physical connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be released cleanly.
    fn close(&mut self) -> FacadeResult<()>;

    /// Starts a new branch on this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the facade is already bound to a branch or the
    /// resource manager rejects the XID.
    fn start(&mut self, xid: &Xid) -> FacadeResult<()>;

    /// Ends the bound branch and prepares it.
    ///
    /// After this returns the facade is no longer bound to an active branch;
    /// the branch waits for a commit or rollback.
    ///
    /// # Errors
    ///
    /// Returns an error if `xid` is not the branch bound to this facade or
    /// the resource manager refuses to prepare it.
    fn end_and_prepare(&mut self, xid: &Xid) -> FacadeResult<()>;

    /// Commits a prepared branch.
    ///
    /// # Arguments
    ///
    /// * `xid` - The branch to commit
    /// * `ignore_unknown` - Treat a branch the resource manager no longer
    ///   knows as already committed
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&mut self, xid: &Xid, ignore_unknown: bool) -> FacadeResult<()>;

    /// Rolls back a prepared branch.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&mut self, xid: &Xid) -> FacadeResult<()>;

    /// Marks a branch as failed and rolls it back.
    ///
    /// Unlike [`rollback`](XaFacade::rollback) this also accepts a branch
    /// that is still active on this facade.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn fail_and_rollback(&mut self, xid: &Xid) -> FacadeResult<()>;

    /// Returns the branches the resource manager holds as prepared but
    /// not yet committed or rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the recovery scan fails.
    fn recover(&mut self) -> FacadeResult<Vec<Xid>>;

    /// Returns the current data connection, if one is established.
    fn connection(&self) -> Option<&Self::Connection>;

    /// Checks whether the data connection is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself fails.
    fn is_connection_valid(&self) -> FacadeResult<bool>;

    /// Returns the data connection, establishing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn get_or_establish_connection(&mut self) -> FacadeResult<&Self::Connection>;

    /// Drops the data connection.
    fn close_connection(&mut self);

    /// Replaces the data connection with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the new connection cannot be established.
    fn reestablish_connection(&mut self) -> FacadeResult<&Self::Connection>;
}
