//! # strata core
//!
//! Single-node relational storage kernel.
//!
//! This crate provides:
//! - Disk manager over a page file and a log file
//! - Buffer pool with pinning, dirty tracking and LRU replacement
//! - Slotted table pages, header pages and B+tree pages
//! - Table heaps with two-phase deletes
//! - Write-ahead logging with redo/undo crash recovery
//! - Transactions, a B+tree index and a [`StorageEngine`] facade
//!
//! ## Layers
//!
//! ```text
//! StorageEngine ── TableHeap / BPlusTree ── BufferPoolManager ── DiskManager
//!        │                 │                                        │
//!        └── TransactionManager ── LogManager ──────────────────────┘
//! ```
//!
//! Query execution, SQL and lock management live above this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
mod catalog;
mod config;
mod dir;
mod disk;
mod engine;
mod error;
pub mod index;
pub mod page;
mod recovery;
pub mod table;
#[cfg(test)]
mod testing;
pub mod transaction;
pub mod tuple;
mod types;
pub mod wal;

pub use buffer::{BufferPoolManager, PageGuard};
pub use catalog::{Catalog, MemoryCatalog};
pub use config::{Config, ReplacerKind, DEFAULT_LOG_BUFFER_CAPACITY, DEFAULT_POOL_SIZE};
pub use dir::DatabaseDir;
pub use disk::{DiskManager, DiskStats};
pub use engine::{StorageEngine, HEADER_PAGE_ID};
pub use error::{CoreError, CoreResult};
pub use index::BPlusTree;
pub use page::{Page, PageKind};
pub use recovery::{Recovery, RecoveryReport};
pub use table::{TableHeap, TableIter};
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use tuple::{Column, Schema, Tuple, TypeId, Value};
pub use types::{FrameId, Lsn, Oid, PageId, Rid, TransactionId, PAGE_SIZE};
pub use wal::{LogManager, LogRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
