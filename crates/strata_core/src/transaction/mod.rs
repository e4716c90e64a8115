//! Transactions.
//!
//! A [`Transaction`] carries its id, the LSN of its last log record and a
//! write set. The table heap logs every mutation under the transaction and
//! appends to the write set; the [`TransactionManager`] uses the write set
//! to finalize deletes at commit and to undo changes on abort.
//!
//! There is no lock manager: concurrent writers must not touch the same
//! tuples.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState, WriteKind, WriteRecord};
