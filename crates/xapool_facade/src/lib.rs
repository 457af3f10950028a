//! # xapool Facade
//!
//! Resource facade and factory contracts for xapool.
//!
//! This crate provides the lowest-level abstraction xapool pools over: a
//! single physical connection able to take part in **one** XA transaction
//! branch at a time. Facades are opaque to the pool - it never looks at
//! driver state, it only drives the branch protocol through them.
//!
//! ## Design Principles
//!
//! - A facade is one physical connection (open, close, branch protocol)
//! - A facade holds at most one in-flight branch
//! - Finalizing a prepared branch may go through any facade bound to the
//!   same resource manager, not only the one that prepared it
//! - Factories carry configuration only, never live connections
//!
//! ## Available Implementations
//!
//! - [`InMemoryFacade`] - Simulated connection over an [`InMemoryResourceManager`]
//! - [`InMemoryFacadeFactory`] - Factory producing in-memory facades
//! - [`FnFactory`] - Adapts a closure into a [`FacadeFactory`]
//!
//! ## Example
//!
//! ```rust
//! use xapool_facade::{FacadeFactory, InMemoryFacadeFactory, XaConfig, XaFacade, Xid};
//!
//! let factory = InMemoryFacadeFactory::new(XaConfig::new("orders"));
//! let mut facade = factory.create().unwrap();
//! facade.open().unwrap();
//!
//! let xid = Xid::new(1, b"global-1".to_vec(), b"branch-1".to_vec()).unwrap();
//! facade.start(&xid).unwrap();
//! facade.end_and_prepare(&xid).unwrap();
//! assert_eq!(facade.recover().unwrap(), vec![xid.clone()]);
//! facade.commit(&xid, false).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod facade;
mod factory;
mod memory;
mod xid;

pub use config::XaConfig;
pub use error::{
    FacadeError, FacadeResult, XAER_DUPID, XAER_NOTA, XAER_PROTO, XAER_RMERR, XAER_RMFAIL,
};
pub use facade::XaFacade;
pub use factory::{factory_fn, FacadeFactory, FnFactory};
pub use memory::{
    BranchOutcome, InMemoryConnection, InMemoryFacade, InMemoryFacadeFactory,
    InMemoryResourceManager,
};
pub use xid::{Xid, MAX_BRANCH_QUALIFIER_SIZE, MAX_GTRID_SIZE};
