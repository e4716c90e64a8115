//! # strata testkit
//!
//! Test utilities for strata.
//!
//! This crate provides:
//! - Engine fixtures over temporary directories or memory
//! - Sample schemas and tuples
//! - Property-based generators using proptest
//! - A crash harness that drops an engine mid-flight and reopens it
//!   against whatever reached storage
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_engine() {
//!     with_temp_engine(|engine| {
//!         let mut txn = engine.begin().unwrap();
//!         let users = engine.create_table(USERS, &mut txn).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
