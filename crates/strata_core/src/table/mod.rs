//! Tables.
//!
//! A [`TableHeap`] hides page boundaries: callers see tuples addressed by
//! RIDs that stay valid for the tuple's whole life. Deletes happen in two
//! phases:
//!
//! ```text
//! LIVE --mark_delete--> TOMBSTONED --apply_delete--> GONE
//!   ^                        |
//!   +----rollback_delete-----+
//! ```
//!
//! GONE is terminal.

mod heap;
mod iter;

pub use heap::TableHeap;
pub use iter::TableIter;
