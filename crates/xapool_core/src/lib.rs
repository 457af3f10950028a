//! # xapool Core
//!
//! Pooling XA connection provider for xapool.
//!
//! This crate provides:
//! - [`PoolingXaProvider`], which multiplexes XA branches over a pool of
//!   one-branch-per-connection facades
//! - Pool statistics
//! - A classified error type separating caller misuse from retryable
//!   resource failures
//!
//! ## Branch Lifecycle
//!
//! ```text
//!  idle ──start──▶ active ──end_and_prepare──▶ prepared ──commit/rollback──▶ idle
//!                    │                                          ▲
//!                    └────────────fail_and_rollback─────────────┘
//! ```
//!
//! A facade leaves the idle queue when a branch starts on it, stays bound
//! to the branch through prepare, and goes back to the tail of the queue
//! once the branch is finalized, whether or not finalization succeeded.
//!
//! ## Key Invariants
//!
//! - At most one branch is active at a time
//! - The active facade is always bound to the active branch
//! - A facade is never both idle and bound to a branch
//! - A facade is bound to at most one branch
//! - Finalizing a branch never leaves its facade bound

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod pool;
mod provider;
mod stats;

pub use error::{BranchAction, ErrorKind, PoolError, PoolResult};
pub use provider::{ConnectionOf, PoolingXaProvider};
pub use stats::{PoolStats, StatsSnapshot};

// Collaborator contracts, so most users only need this crate.
pub use xapool_facade::{
    FacadeError, FacadeFactory, FacadeResult, InMemoryFacadeFactory, InMemoryResourceManager,
    XaConfig, XaFacade, Xid,
};
