//! Error types for facade operations.

use crate::xid::Xid;
use thiserror::Error;

/// The XID is not valid (unknown to the resource manager).
pub const XAER_NOTA: i32 = -4;

/// Routine invoked in an improper context.
pub const XAER_PROTO: i32 = -6;

/// The XID already exists.
pub const XAER_DUPID: i32 = -8;

/// Resource manager unavailable.
pub const XAER_RMFAIL: i32 = -7;

/// A resource manager error occurred in the transaction branch.
pub const XAER_RMERR: i32 = -3;

/// Result type for facade operations.
pub type FacadeResult<T> = Result<T, FacadeError>;

/// Errors that can occur while driving a resource facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FacadeError {
    /// The resource manager rejected an XA call.
    #[error("XA error {code}: {message}")]
    Xa {
        /// XA return code (one of the `XAER_*` constants).
        code: i32,
        /// Description of the failure.
        message: String,
    },

    /// The branch is not known to the resource manager.
    #[error("unknown transaction branch: {xid}")]
    UnknownBranch {
        /// The branch that was not found.
        xid: Xid,
    },

    /// The connection is already bound to another branch.
    #[error("connection busy: bound to {bound}, cannot start {requested}")]
    ConnectionBusy {
        /// The branch currently bound to the connection.
        bound: Xid,
        /// The branch that was requested.
        requested: Xid,
    },

    /// The facade is closed.
    #[error("facade is closed")]
    Closed,

    /// The underlying data connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The transaction identifier is malformed.
    #[error("invalid xid: {0}")]
    InvalidXid(String),

    /// The resource manager cannot be reached.
    #[error("resource manager unavailable: {0}")]
    Unavailable(String),
}

impl FacadeError {
    /// Creates an XA error with the given return code.
    pub fn xa(code: i32, message: impl Into<String>) -> Self {
        Self::Xa {
            code,
            message: message.into(),
        }
    }

    /// Creates a protocol error (`XAER_PROTO`).
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::xa(XAER_PROTO, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Returns the XA return code carried by this error, if any.
    pub fn xa_code(&self) -> Option<i32> {
        match self {
            FacadeError::Xa { code, .. } => Some(*code),
            FacadeError::UnknownBranch { .. } => Some(XAER_NOTA),
            FacadeError::Unavailable(_) => Some(XAER_RMFAIL),
            _ => None,
        }
    }
}
