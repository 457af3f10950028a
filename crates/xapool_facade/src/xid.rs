//! Transaction branch identifiers.

use crate::error::{FacadeError, FacadeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a global transaction id, in bytes.
pub const MAX_GTRID_SIZE: usize = 64;

/// Maximum length of a branch qualifier, in bytes.
pub const MAX_BRANCH_QUALIFIER_SIZE: usize = 64;

/// Identifier of one XA transaction branch.
///
/// Follows the X/Open layout: a format id, a global transaction id shared
/// by every branch of the same distributed transaction, and a branch
/// qualifier that tells the branches apart. Equality and hashing cover all
/// three parts. Deserializing goes through [`Xid::new`], so the size limits
/// hold for identifiers read back from a snapshot too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawXid")]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Creates a new XID.
    ///
    /// # Errors
    ///
    /// Returns [`FacadeError::InvalidXid`] if the global id or the branch
    /// qualifier exceeds 64 bytes.
    pub fn new(
        format_id: i32,
        global_transaction_id: Vec<u8>,
        branch_qualifier: Vec<u8>,
    ) -> FacadeResult<Self> {
        if global_transaction_id.len() > MAX_GTRID_SIZE {
            return Err(FacadeError::InvalidXid(format!(
                "global transaction id is {} bytes, max {}",
                global_transaction_id.len(),
                MAX_GTRID_SIZE
            )));
        }
        if branch_qualifier.len() > MAX_BRANCH_QUALIFIER_SIZE {
            return Err(FacadeError::InvalidXid(format!(
                "branch qualifier is {} bytes, max {}",
                branch_qualifier.len(),
                MAX_BRANCH_QUALIFIER_SIZE
            )));
        }
        Ok(Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        })
    }

    /// Generates a branch of a fresh global transaction.
    ///
    /// The global id is a random UUID; the branch qualifier is the
    /// big-endian encoding of `branch`.
    #[must_use]
    pub fn generate(format_id: i32, branch: u32) -> Self {
        Self {
            format_id,
            global_transaction_id: Uuid::new_v4().as_bytes().to_vec(),
            branch_qualifier: branch.to_be_bytes().to_vec(),
        }
    }

    /// Returns the format id.
    #[must_use]
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Returns the global transaction id.
    #[must_use]
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Returns the branch qualifier.
    #[must_use]
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

#[derive(Deserialize)]
struct RawXid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl TryFrom<RawXid> for Xid {
    type Error = FacadeError;

    fn try_from(raw: RawXid) -> FacadeResult<Self> {
        Self::new(raw.format_id, raw.global_transaction_id, raw.branch_qualifier)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
