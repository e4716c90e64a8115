//! Transaction lifecycle: begin, commit and rollback.

use super::state::{Transaction, WriteKind, WriteRecord};
use crate::error::CoreResult;
use crate::types::{Lsn, TransactionId};
use crate::wal::{LogBody, LogManager, LogRecord};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands out transaction ids and drives commit and abort.
///
/// Commit finalizes the transaction's pending deletes, then logs COMMIT.
/// Abort undoes the write set newest-first, logging every compensating
/// change like an ordinary mutation, then logs ABORT. With
/// `sync_on_commit` both force the log before returning.
pub struct TransactionManager {
    log: Arc<LogManager>,
    next_txn_id: AtomicI32,
    sync_on_commit: bool,
    active: Mutex<HashSet<TransactionId>>,
}

impl TransactionManager {
    /// Creates a manager whose first transaction gets id 1.
    pub fn new(log: Arc<LogManager>, sync_on_commit: bool) -> Self {
        Self {
            log,
            next_txn_id: AtomicI32::new(1),
            sync_on_commit,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Continues numbering after `max_seen`, typically the highest id found
    /// in the log.
    pub fn resume_after(&self, max_seen: TransactionId) {
        self.next_txn_id
            .fetch_max(max_seen.as_i32() + 1, Ordering::SeqCst);
    }

    /// Begins a new transaction and logs BEGIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the BEGIN record cannot be appended.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mut record = LogRecord::new(id, Lsn::INVALID, LogBody::Begin);
        let lsn = self.log.append(&mut record)?;
        self.active.lock().insert(id);
        debug!(txn = %id, "begin");
        Ok(Transaction::new(id, lsn))
    }

    /// Commits a transaction.
    ///
    /// Tuples the transaction tombstoned are removed for good, then COMMIT
    /// is logged. On failure the transaction stays active with its write
    /// set intact, so it can still be aborted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionNotActive`] if the transaction
    /// already finished, or any error from finalizing deletes or logging.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;

        let mut writes = txn.take_write_set();
        let result =
            finalize_deletes(&mut writes, txn).and_then(|()| self.finish(txn, LogBody::Commit));
        if let Err(e) = result {
            warn!(txn = %txn.id(), error = %e, "commit failed");
            txn.restore_write_set(writes);
            return Err(e);
        }

        txn.mark_committed();
        debug!(txn = %txn.id(), "commit");
        Ok(())
    }

    /// Rolls a transaction back.
    ///
    /// Writes are undone newest-first. If an undo step fails, the writes
    /// not yet undone stay in the write set and the abort can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TransactionNotActive`] if the transaction
    /// already finished, or any error from undoing writes or logging.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;

        let mut writes = txn.take_write_set();
        let undone = writes.len();
        while let Some(write) = writes.pop() {
            if let Err(e) = undo(&write, txn) {
                warn!(txn = %txn.id(), rid = %write.rid, error = %e, "undo failed");
                writes.push(write);
                txn.restore_write_set(writes);
                return Err(e);
            }
        }

        self.finish(txn, LogBody::Abort)?;
        txn.mark_aborted();
        debug!(txn = %txn.id(), undone, "abort");
        Ok(())
    }

    /// Number of transactions begun but not yet finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn finish(&self, txn: &mut Transaction, body: LogBody) -> CoreResult<()> {
        let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), body);
        let lsn = self.log.append(&mut record)?;
        txn.set_prev_lsn(lsn);
        if self.sync_on_commit {
            self.log.flush()?;
        }
        self.active.lock().remove(&txn.id());
        Ok(())
    }
}

/// Removes the tuples `writes` tombstoned, turning each finished entry into
/// [`WriteKind::Removed`] so a later abort knows to reinsert it.
fn finalize_deletes(writes: &mut [WriteRecord], txn: &mut Transaction) -> CoreResult<()> {
    for write in writes.iter_mut() {
        if write.kind == WriteKind::Delete {
            let old = write.heap.apply_delete(write.rid, txn)?;
            write.kind = WriteKind::Removed { old };
        }
    }
    Ok(())
}

fn undo(write: &WriteRecord, txn: &mut Transaction) -> CoreResult<()> {
    match &write.kind {
        WriteKind::Insert => write.heap.apply_delete(write.rid, txn).map(drop),
        WriteKind::Delete => write.heap.rollback_delete(write.rid, txn),
        WriteKind::Update { old } => write.heap.restore_tuple(write.rid, old, txn),
        WriteKind::Removed { old } => write.heap.reinsert_tuple(write.rid, old, txn),
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::config::ReplacerKind;
    use crate::disk::DiskManager;
    use crate::error::CoreError;
    use crate::table::TableHeap;
    use crate::transaction::TransactionState;
    use crate::tuple::{Column, Schema, Tuple, TypeId, Value};
    use crate::types::Oid;
    use crate::testing::{faulty_log_disk, Faults};
    use crate::wal::LogRecordType;

    fn setup(
        sync_on_commit: bool,
    ) -> (Arc<BufferPoolManager>, Arc<LogManager>, TransactionManager) {
        let disk = Arc::new(DiskManager::in_memory());
        let log = Arc::new(LogManager::new(Arc::clone(&disk), 1 << 16));
        let bpm = Arc::new(
            BufferPoolManager::new(8, disk, ReplacerKind::Lru).with_log(Arc::clone(&log)),
        );
        let txns = TransactionManager::new(Arc::clone(&log), sync_on_commit);
        (bpm, log, txns)
    }

    /// Like `setup`, but every append flushes through a log that can fail.
    fn faulty_setup() -> (
        Arc<BufferPoolManager>,
        Arc<LogManager>,
        TransactionManager,
        Arc<Faults>,
    ) {
        let (disk, _wal, faults) = faulty_log_disk();
        let log = Arc::new(LogManager::new(Arc::clone(&disk), 1));
        let bpm = Arc::new(
            BufferPoolManager::new(8, disk, ReplacerKind::Lru).with_log(Arc::clone(&log)),
        );
        let txns = TransactionManager::new(Arc::clone(&log), true);
        (bpm, log, txns, faults)
    }

    fn heap(
        bpm: &Arc<BufferPoolManager>,
        log: &Arc<LogManager>,
        txn: &mut Transaction,
    ) -> TableHeap {
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer)]).unwrap();
        TableHeap::create(
            Arc::clone(bpm),
            Arc::clone(log),
            Oid::new(1),
            Arc::new(schema),
            txn,
        )
        .unwrap()
    }

    fn row(id: i32) -> Tuple {
        Tuple::new(vec![Value::Integer(id)])
    }

    #[test]
    fn ids_increase_and_begin_is_logged() {
        let (_bpm, log, txns) = setup(true);
        let a = txns.begin().unwrap();
        let b = txns.begin().unwrap();
        assert!(b.id() > a.id());
        assert_eq!(txns.active_count(), 2);

        log.flush().unwrap();
        let records = log.read().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.record_type() == LogRecordType::Begin));
        assert_eq!(records[0].lsn(), a.prev_lsn());
    }

    #[test]
    fn resume_never_goes_backwards() {
        let (_bpm, _log, txns) = setup(true);
        txns.resume_after(TransactionId::new(41));
        assert_eq!(txns.begin().unwrap().id(), TransactionId::new(42));
        txns.resume_after(TransactionId::new(3));
        assert_eq!(txns.begin().unwrap().id(), TransactionId::new(43));
    }

    #[test]
    fn commit_forces_the_log() {
        let (_bpm, log, txns) = setup(true);
        let mut txn = txns.begin().unwrap();
        txns.commit(&mut txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(log.persistent_lsn(), txn.prev_lsn());
        assert_eq!(txns.active_count(), 0);
    }

    #[test]
    fn lazy_commit_leaves_the_log_buffered() {
        let (_bpm, log, txns) = setup(false);
        let mut txn = txns.begin().unwrap();
        txns.commit(&mut txn).unwrap();
        assert!(log.persistent_lsn() < txn.prev_lsn());
    }

    #[test]
    fn finished_transactions_reject_work() {
        let (bpm, log, txns) = setup(true);
        let mut txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut txn);
        txns.commit(&mut txn).unwrap();

        assert!(matches!(
            txns.commit(&mut txn),
            Err(CoreError::TransactionNotActive { .. })
        ));
        assert!(matches!(
            txns.abort(&mut txn),
            Err(CoreError::TransactionNotActive { .. })
        ));
        assert!(matches!(
            table.insert_tuple(&row(1), &mut txn),
            Err(CoreError::TransactionNotActive { .. })
        ));
    }

    #[test]
    fn abort_unwinds_newest_first() {
        let (bpm, log, txns) = setup(true);
        let mut setup_txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut setup_txn);
        let kept = table.insert_tuple(&row(1), &mut setup_txn).unwrap();
        txns.commit(&mut setup_txn).unwrap();

        let mut txn = txns.begin().unwrap();
        let added = table.insert_tuple(&row(2), &mut txn).unwrap();
        assert!(table.update_tuple(kept, &row(10), &mut txn).unwrap());
        table.mark_delete(kept, &mut txn).unwrap();
        assert_eq!(txn.write_set().len(), 3);
        txns.abort(&mut txn).unwrap();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.write_set().is_empty());
        assert_eq!(table.get_tuple(kept).unwrap(), row(1));
        assert!(table.get_tuple(added).is_err());

        let kinds: Vec<LogRecordType> = log
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.txn_id() == txn.id())
            .map(LogRecord::record_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                LogRecordType::Begin,
                LogRecordType::Insert,
                LogRecordType::Update,
                LogRecordType::MarkDelete,
                LogRecordType::RollbackDelete,
                LogRecordType::Update,
                LogRecordType::ApplyDelete,
                LogRecordType::Abort,
            ]
        );
    }

    #[test]
    fn unlogged_insert_leaves_nothing_to_undo() {
        let (bpm, log, txns, faults) = faulty_setup();
        let mut txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut txn);
        let before = txn.prev_lsn();

        faults.fail_sync_after(0);
        assert!(table.insert_tuple(&row(1), &mut txn).is_err());
        assert!(txn.write_set().is_empty());
        assert_eq!(txn.prev_lsn(), before);
        assert!(table.scan().unwrap().is_empty());

        txns.abort(&mut txn).unwrap();
        assert!(table.scan().unwrap().is_empty());
        assert!(log
            .read()
            .unwrap()
            .iter()
            .all(|r| r.record_type() != LogRecordType::Insert));
    }

    #[test]
    fn unlogged_delete_keeps_the_tuple_visible() {
        let (bpm, log, txns, faults) = faulty_setup();
        let mut txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut txn);
        let rid = table.insert_tuple(&row(1), &mut txn).unwrap();

        faults.fail_sync_after(0);
        assert!(table.mark_delete(rid, &mut txn).is_err());
        assert_eq!(table.get_tuple(rid).unwrap(), row(1));
        assert_eq!(txn.write_set().len(), 1);

        txns.commit(&mut txn).unwrap();
        assert_eq!(table.get_tuple(rid).unwrap(), row(1));
    }

    #[test]
    fn failed_commit_can_still_be_aborted() {
        let (bpm, log, txns, faults) = faulty_setup();
        let mut setup_txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut setup_txn);
        let first = table.insert_tuple(&row(1), &mut setup_txn).unwrap();
        let second = table.insert_tuple(&row(2), &mut setup_txn).unwrap();
        txns.commit(&mut setup_txn).unwrap();

        let mut txn = txns.begin().unwrap();
        let added = table.insert_tuple(&row(3), &mut txn).unwrap();
        table.mark_delete(first, &mut txn).unwrap();
        table.mark_delete(second, &mut txn).unwrap();

        // the first delete is finalized, logging the second one fails
        faults.fail_sync_after(1);
        assert!(txns.commit(&mut txn).is_err());
        assert_eq!(txn.state(), TransactionState::Active);
        assert_eq!(txns.active_count(), 1);
        let kinds: Vec<&WriteKind> = txn.write_set().iter().map(|w| &w.kind).collect();
        assert!(matches!(
            kinds[..],
            [WriteKind::Insert, WriteKind::Removed { .. }, WriteKind::Delete]
        ));

        txns.abort(&mut txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(table.get_tuple(first).unwrap(), row(1));
        assert_eq!(table.get_tuple(second).unwrap(), row(2));
        assert!(table.get_tuple(added).is_err());
        assert_eq!(txns.active_count(), 0);
    }

    #[test]
    fn failed_undo_keeps_the_rest_for_a_retry() {
        let (bpm, log, txns, faults) = faulty_setup();
        let mut txn = txns.begin().unwrap();
        let table = heap(&bpm, &log, &mut txn);
        let a = table.insert_tuple(&row(1), &mut txn).unwrap();
        let b = table.insert_tuple(&row(2), &mut txn).unwrap();

        // undoing b succeeds, undoing a does not
        faults.fail_sync_after(1);
        assert!(txns.abort(&mut txn).is_err());
        assert_eq!(txn.state(), TransactionState::Active);
        assert_eq!(txn.write_set().len(), 1);
        assert_eq!(txn.write_set()[0].rid, a);
        assert!(table.get_tuple(b).is_err());
        assert_eq!(table.get_tuple(a).unwrap(), row(1));

        txns.abort(&mut txn).unwrap();
        assert!(table.scan().unwrap().is_empty());
    }
}
