//! # CofferDB Testkit
//!
//! Test utilities for CofferDB.
//!
//! This crate provides:
//! - Temporary data roots with matching configuration
//! - Canned document sets and test logging setup
//! - Property-based test generators using proptest
//! - Stress testing utilities for concurrent writers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cofferdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let users = db.collection_or_create("users").unwrap();
//!         users.insert_many(sample_people()).unwrap();
//!     });
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
