//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::table::TableHeap;
use crate::types::{Lsn, Rid, TransactionId};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// What a write did, with enough information to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteKind {
    /// Tuple inserted; undone by removing it.
    Insert,
    /// Tuple tombstoned; finalized at commit, restored on abort.
    Delete,
    /// Tuple overwritten; `old` is restored on abort.
    Update {
        /// Image before the update.
        old: Vec<u8>,
    },
    /// Tombstoned tuple already removed by a commit that then failed;
    /// reinserted on abort.
    Removed {
        /// Image of the removed tuple.
        old: Vec<u8>,
    },
}

/// One entry of a transaction's write set.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    /// Tuple written.
    pub rid: Rid,
    /// Operation performed.
    pub kind: WriteKind,
    /// Table the tuple belongs to.
    pub heap: TableHeap,
}

/// A transaction context threaded through table heap mutations.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    prev_lsn: Lsn,
    state: TransactionState,
    write_set: Vec<WriteRecord>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, begin_lsn: Lsn) -> Self {
        Self {
            id,
            prev_lsn: begin_lsn,
            state: TransactionState::Active,
            write_set: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// LSN of the last record this transaction logged.
    #[must_use]
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub(crate) fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Writes performed so far, oldest first.
    #[must_use]
    pub fn write_set(&self) -> &[WriteRecord] {
        &self.write_set
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::TransactionNotActive { txn_id: self.id })
        }
    }

    pub(crate) fn record_write(&mut self, rid: Rid, kind: WriteKind, heap: &TableHeap) {
        self.write_set.push(WriteRecord {
            rid,
            kind,
            heap: heap.clone(),
        });
    }

    pub(crate) fn take_write_set(&mut self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.write_set)
    }

    /// Puts back entries a failed commit or abort did not get through.
    pub(crate) fn restore_write_set(&mut self, mut writes: Vec<WriteRecord>) {
        writes.append(&mut self.write_set);
        self.write_set = writes;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }
}
