//! Error types for the pooling provider.

use std::fmt;
use thiserror::Error;
use xapool_facade::{FacadeError, Xid};

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// The protocol action a finalize or recovery call was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchAction {
    /// Second-phase commit.
    Commit,
    /// Second-phase rollback.
    Rollback,
    /// Rollback of a failed branch.
    FailAndRollback,
    /// Recovery scan.
    Recover,
}

impl fmt::Display for BranchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchAction::Commit => "commit",
            BranchAction::Rollback => "rollback",
            BranchAction::FailAndRollback => "fail-and-rollback",
            BranchAction::Recover => "recover",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`PoolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition was violated by the caller.
    StateViolation,
    /// A passthrough was called with no active branch.
    NoActiveBranch,
    /// A finalize or recovery call failed and may be retried.
    Transient,
    /// A new facade could not be created or opened.
    ResourceCreation,
    /// Any other facade failure.
    Resource,
    /// One or more facades failed to close.
    CloseFailed,
}

/// Errors that can occur in pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Operation not permitted in the provider's current state.
    ///
    /// Indicates caller misuse; not retryable.
    #[error("state violation: {message}")]
    StateViolation {
        /// Description of the violated precondition.
        message: String,
    },

    /// A data-access passthrough was called with no branch active.
    #[error("no active transaction branch for {operation}")]
    NoActiveBranch {
        /// The passthrough that was called.
        operation: &'static str,
    },

    /// A commit, rollback or recovery scan failed against the resource
    /// manager. The facade involved has already been returned to the pool.
    #[error("transient failure during {action}: {source}")]
    Transient {
        /// The action that failed.
        action: BranchAction,
        /// The branch being finalized (`None` for recovery).
        xid: Option<Xid>,
        /// The facade failure.
        #[source]
        source: FacadeError,
    },

    /// Creating or opening a new facade failed.
    #[error("failed to create resource facade: {0}")]
    ResourceCreation(#[source] FacadeError),

    /// A facade call failed.
    #[error("resource error: {0}")]
    Resource(#[from] FacadeError),

    /// Shutdown could not close every facade.
    #[error("failed to close {} of {total} facades", .failures.len())]
    CloseFailed {
        /// Number of facades shutdown attempted to close.
        total: usize,
        /// Every close failure, in the order they happened.
        failures: Vec<FacadeError>,
    },
}

impl PoolError {
    /// Creates a state violation error.
    pub fn state_violation(message: impl Into<String>) -> Self {
        Self::StateViolation {
            message: message.into(),
        }
    }

    /// Creates a transient failure for a finalize action.
    pub fn transient(action: BranchAction, xid: Option<Xid>, source: FacadeError) -> Self {
        Self::Transient {
            action,
            xid,
            source,
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::StateViolation { .. } => ErrorKind::StateViolation,
            PoolError::NoActiveBranch { .. } => ErrorKind::NoActiveBranch,
            PoolError::Transient { .. } => ErrorKind::Transient,
            PoolError::ResourceCreation(_) => ErrorKind::ResourceCreation,
            PoolError::Resource(_) => ErrorKind::Resource,
            PoolError::CloseFailed { .. } => ErrorKind::CloseFailed,
        }
    }

    /// Returns true if the coordinator may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Transient { .. })
    }
}
