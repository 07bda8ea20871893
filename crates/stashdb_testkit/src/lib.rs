//! # StashDB Testkit
//!
//! Test utilities for StashDB.
//!
//! This crate provides:
//! - Storage domains and registries that clean up after themselves
//! - An event recorder for asserting on store notifications
//! - Property-based generators and a reference model for stores
//! - Stress scenarios with many contexts sharing one database
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stashdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_store() {
//!     let domain = TestDomain::memory();
//!     let store = domain.registry().store("test", None);
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
