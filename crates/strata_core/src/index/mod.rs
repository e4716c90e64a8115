//! Secondary access paths.
//!
//! [`BPlusTree`] maps unique `i32` keys to RIDs using the B+tree internal
//! and leaf page formats. Leaves are chained left to right, so range scans
//! never revisit internal nodes.
//!
//! # Durability
//!
//! Index pages are not covered by the write-ahead log. A tree opened
//! through the engine is registered in the directory and writes each
//! change through to disk before returning, so its entries survive a
//! crash. A standalone tree reaches disk only through eviction and
//! explicit flushes.

mod btree;

pub use btree::BPlusTree;
