//! # xapool Testkit
//!
//! Test utilities for xapool.
//!
//! This crate provides:
//! - A recording facade and factory with a shared call log and fault
//!   injection
//! - Branch id helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use xapool_testkit::prelude::*;
//!
//! #[test]
//! fn commit_goes_through_mapped_facade() {
//!     let factory = RecordingFactory::new();
//!     let mut provider = PoolingXaProvider::from_factory(factory.clone());
//!     provider.open().unwrap();
//!     provider.start(&xid(1)).unwrap();
//!     // ...
//!     assert_eq!(factory.calls_of(FacadeCall::Start).len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
