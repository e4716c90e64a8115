//! # strata storage
//!
//! Byte-store backends for the strata storage kernel.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque byte stores**: they do not know about pages, tuples or log
//! records. The disk manager in `strata_core` owns all interpretation of the
//! bytes it stores here.
//!
//! The kernel keeps two of these per database: a page file addressed in
//! fixed-size pages, overwritten in place and grown with `set_len`, and a
//! log file that only ever grows through `append` (or is cut back to drop a
//! torn tail).
//!
//! ## Backends
//!
//! - [`FileBackend`]: one OS file
//! - [`InMemoryBackend`]: a shareable byte vector for ephemeral engines and tests
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut pages = InMemoryBackend::new();
//! pages.set_len(4096).unwrap();
//! pages.write_at(8, b"tuple").unwrap();
//! assert_eq!(pages.read_at(8, 5).unwrap(), b"tuple");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
