//! Crash recovery.
//!
//! Recovery runs once at startup, before any new transaction begins, over
//! the records returned by [`LogManager::bootstrap`]:
//!
//! 1. **Redo** replays the whole log forward. A record is applied only when
//!    the target page's LSN is older than the record's, then the page is
//!    stamped with the record's LSN. Replaying twice changes nothing.
//! 2. **Undo** walks the log backward and reverses every change made by a
//!    *loser*: a transaction with no COMMIT or ABORT record. Each reversal
//!    is logged as an ordinary record of the loser.
//! 3. Every loser receives an ABORT record, the log is forced, and all
//!    pages are flushed.
//!
//! NEW_PAGE is never undone: a page that a loser linked into a chain stays
//! linked and simply ends up empty.

use crate::buffer::BufferPoolManager;
use crate::error::{CoreError, CoreResult};
use crate::page::{PageKind, TablePage};
use crate::types::{Lsn, PageId, TransactionId};
use crate::wal::{LogBody, LogManager, LogRecord};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Summary of a recovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records read from the log.
    pub records: usize,
    /// Records whose effect was reapplied to a page.
    pub redone: usize,
    /// Changes reversed for losers.
    pub undone: usize,
    /// Transactions rolled back.
    pub losers: usize,
    /// Highest transaction id found in the log.
    pub max_txn_id: TransactionId,
}

/// Redo/undo driver over a buffer pool and a log.
pub struct Recovery<'a> {
    bpm: &'a BufferPoolManager,
    log: &'a LogManager,
}

impl<'a> Recovery<'a> {
    /// Creates a recovery driver.
    pub fn new(bpm: &'a BufferPoolManager, log: &'a LogManager) -> Self {
        Self { bpm, log }
    }

    /// Runs redo, undo and the final flush.
    ///
    /// # Errors
    ///
    /// Any failure aborts recovery; the engine must not accept work after
    /// a failed run.
    pub fn run(&self, records: &[LogRecord]) -> CoreResult<RecoveryReport> {
        info!(records = records.len(), "recovery started");
        let redone = self.redo(records)?;

        let mut losers = find_losers(records);
        let undone = self.undo(records, &mut losers)?;

        for (&txn_id, &prev_lsn) in &losers {
            let mut abort = LogRecord::new(txn_id, prev_lsn, LogBody::Abort);
            self.log.append(&mut abort)?;
            debug!(txn = %txn_id, "loser aborted");
        }
        self.log.flush()?;
        self.bpm.flush_all_pages()?;

        let report = RecoveryReport {
            records: records.len(),
            redone,
            undone,
            losers: losers.len(),
            max_txn_id: records
                .iter()
                .map(LogRecord::txn_id)
                .max()
                .unwrap_or_default(),
        };
        info!(
            redone = report.redone,
            undone = report.undone,
            losers = report.losers,
            "recovery finished"
        );
        Ok(report)
    }

    /// Reapplies every record newer than its page. Returns how many were
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorruption`] when a record cannot be applied
    /// to the page it names, or buffer and disk errors.
    pub fn redo(&self, records: &[LogRecord]) -> CoreResult<usize> {
        let mut redone = 0;
        for record in records {
            let lsn = record.lsn();
            let applied = match &record.body {
                LogBody::Begin | LogBody::Commit | LogBody::Abort => false,
                LogBody::NewPage {
                    prev_page_id,
                    page_id,
                    oid,
                } => {
                    let mut applied = self.redo_on(*page_id, lsn, |page| {
                        page.set_oid(*oid);
                        Ok(())
                    })?;
                    if prev_page_id.is_valid() {
                        applied |= self.redo_on(*prev_page_id, lsn, |page| {
                            page.set_next_page_id(*page_id);
                            Ok(())
                        })?;
                    }
                    applied
                }
                body => {
                    let page_id = record
                        .page_id()
                        .ok_or_else(|| CoreError::log_corruption("data record without a page"))?;
                    self.redo_on(page_id, lsn, |page| apply(page, body))?
                }
            };
            if applied {
                redone += 1;
            }
        }
        debug!(redone, "redo pass done");
        Ok(redone)
    }

    /// Reverses the changes of `losers`, newest first, logging each
    /// reversal. `losers` maps each loser to its last LSN and advances as
    /// compensation records are written.
    fn undo(
        &self,
        records: &[LogRecord],
        losers: &mut BTreeMap<TransactionId, Lsn>,
    ) -> CoreResult<usize> {
        let mut undone = 0;
        for record in records.iter().rev() {
            let Some(prev_lsn) = losers.get_mut(&record.txn_id()) else {
                continue;
            };
            let Some(inverse) = invert(&record.body) else {
                continue;
            };
            let Some(rid) = inverse.rid() else {
                continue;
            };

            let guard = self.bpm.fetch_page(rid.page_id, PageKind::Table)?;
            let mut page = guard.write();
            let table = page.as_table_mut()?;
            apply(table, &inverse)?;
            let mut compensation = LogRecord::new(record.txn_id(), *prev_lsn, inverse);
            let lsn = self.log.append(&mut compensation)?;
            table.set_lsn(lsn);
            *prev_lsn = lsn;
            undone += 1;
        }
        debug!(undone, "undo pass done");
        Ok(undone)
    }

    /// Applies `change` to a table page unless the page already reflects
    /// `lsn`, then stamps it. The page is allocated first when the data
    /// file ends before it.
    fn redo_on<F>(&self, page_id: PageId, lsn: Lsn, change: F) -> CoreResult<bool>
    where
        F: FnOnce(&mut TablePage) -> CoreResult<()>,
    {
        self.ensure_allocated(page_id)?;
        let guard = self.bpm.fetch_page(page_id, PageKind::Table)?;
        if guard.read().lsn() >= lsn {
            return Ok(false);
        }
        let mut page = guard.write();
        let table = page.as_table_mut()?;
        change(table)?;
        table.set_lsn(lsn);
        Ok(true)
    }

    fn ensure_allocated(&self, page_id: PageId) -> CoreResult<()> {
        let disk = self.bpm.disk();
        while i64::from(disk.num_pages()?) <= i64::from(page_id.as_i32()) {
            let allocated = disk.allocate_page_id()?;
            debug!(page_id = %allocated, "allocated page missing from data file");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Recovery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovery").finish_non_exhaustive()
    }
}

/// Transactions that never finished, each mapped to its last LSN.
fn find_losers(records: &[LogRecord]) -> BTreeMap<TransactionId, Lsn> {
    let mut open: HashMap<TransactionId, Lsn> = HashMap::new();
    for record in records {
        match record.body {
            LogBody::Commit | LogBody::Abort => {
                open.remove(&record.txn_id());
            }
            _ => {
                open.insert(record.txn_id(), record.lsn());
            }
        }
    }
    open.into_iter().collect()
}

/// The record that reverses `body`, if it has an effect to reverse.
fn invert(body: &LogBody) -> Option<LogBody> {
    let inverse = match body {
        LogBody::Insert { rid, tuple } => LogBody::ApplyDelete {
            rid: *rid,
            tuple: tuple.clone(),
        },
        LogBody::Update { rid, old, new } => LogBody::Update {
            rid: *rid,
            old: new.clone(),
            new: old.clone(),
        },
        LogBody::MarkDelete { rid, tuple } => LogBody::RollbackDelete {
            rid: *rid,
            tuple: tuple.clone(),
        },
        LogBody::RollbackDelete { rid, tuple } => LogBody::MarkDelete {
            rid: *rid,
            tuple: tuple.clone(),
        },
        LogBody::ApplyDelete { rid, tuple } => LogBody::Insert {
            rid: *rid,
            tuple: tuple.clone(),
        },
        LogBody::Begin | LogBody::Commit | LogBody::Abort | LogBody::NewPage { .. } => {
            return None
        }
    };
    Some(inverse)
}

/// Applies the effect of a data record to its page.
fn apply(page: &mut TablePage, body: &LogBody) -> CoreResult<()> {
    let (rid, done) = match body {
        LogBody::Insert { rid, tuple } => {
            page.insert_tuple_at(rid.slot, tuple)?;
            (rid, true)
        }
        LogBody::Update { rid, new, .. } => (rid, page.update_tuple(rid.slot, new)?.is_some()),
        LogBody::MarkDelete { rid, .. } => (rid, page.mark_delete(rid.slot)),
        LogBody::RollbackDelete { rid, .. } => (rid, page.rollback_delete(rid.slot)),
        LogBody::ApplyDelete { rid, .. } => (rid, page.apply_delete(rid.slot).is_some()),
        LogBody::Begin | LogBody::Commit | LogBody::Abort | LogBody::NewPage { .. } => {
            return Ok(())
        }
    };
    if done {
        Ok(())
    } else {
        Err(CoreError::page_corruption(format!(
            "cannot apply {body:?} to {rid}: slot state disagrees with the log"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplacerKind;
    use crate::disk::DiskManager;
    use crate::table::TableHeap;
    use crate::transaction::TransactionManager;
    use crate::tuple::{Column, Schema, Tuple, TypeId, Value};
    use crate::types::{Oid, PageId};
    use std::sync::Arc;

    /// One process lifetime over a shared disk.
    struct Session {
        bpm: Arc<BufferPoolManager>,
        log: Arc<LogManager>,
        txns: TransactionManager,
    }

    impl Session {
        fn start(disk: &Arc<DiskManager>) -> (Self, Vec<LogRecord>) {
            let log = Arc::new(LogManager::new(Arc::clone(disk), 1 << 16));
            let records = log.bootstrap().unwrap();
            let bpm = Arc::new(
                BufferPoolManager::new(8, Arc::clone(disk), ReplacerKind::Lru)
                    .with_log(Arc::clone(&log)),
            );
            let txns = TransactionManager::new(Arc::clone(&log), true);
            let max = records
                .iter()
                .map(LogRecord::txn_id)
                .max()
                .unwrap_or_default();
            txns.resume_after(max);
            (Self { bpm, log, txns }, records)
        }

        fn recover(disk: &Arc<DiskManager>) -> (Self, RecoveryReport) {
            let (session, records) = Self::start(disk);
            let report = Recovery::new(&session.bpm, &session.log)
                .run(&records)
                .unwrap();
            (session, report)
        }

        fn table(&self, first_page_id: PageId) -> TableHeap {
            TableHeap::open(
                Arc::clone(&self.bpm),
                Arc::clone(&self.log),
                Oid::new(7),
                first_page_id,
                schema(),
            )
        }

        /// Loses every cached page and every unflushed log record.
        fn crash(self) {
            drop(self);
        }
    }

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                Column::new("id", TypeId::Integer),
                Column::new("body", TypeId::Varchar),
            ])
            .unwrap(),
        )
    }

    fn row(id: i32, body: &str) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::from(body)])
    }

    fn rows(heap: &TableHeap) -> Vec<Tuple> {
        heap.scan().unwrap().into_iter().map(|(_, t)| t).collect()
    }

    fn create(session: &Session) -> TableHeap {
        let mut txn = session.txns.begin().unwrap();
        let heap = TableHeap::create(
            Arc::clone(&session.bpm),
            Arc::clone(&session.log),
            Oid::new(7),
            schema(),
            &mut txn,
        )
        .unwrap();
        session.txns.commit(&mut txn).unwrap();
        heap
    }

    fn page_images(disk: &DiskManager) -> Vec<Vec<u8>> {
        (0..disk.num_pages().unwrap())
            .map(|id| disk.read_page(PageId::new(id as i32)).unwrap())
            .collect()
    }

    #[test]
    fn committed_insert_is_redone() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut txn = session.txns.begin().unwrap();
        let rid = heap.insert_tuple(&row(1, "durable"), &mut txn).unwrap();
        session.txns.commit(&mut txn).unwrap();
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert!(report.redone >= 2);
        assert_eq!(report.losers, 0);

        let heap = session.table(first);
        assert_eq!(heap.get_tuple(rid).unwrap(), row(1, "durable"));
        assert_eq!(rows(&heap), vec![row(1, "durable")]);
    }

    #[test]
    fn uncommitted_insert_is_undone() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut committed = session.txns.begin().unwrap();
        heap.insert_tuple(&row(1, "kept"), &mut committed).unwrap();
        session.txns.commit(&mut committed).unwrap();

        let mut loser = session.txns.begin().unwrap();
        heap.insert_tuple(&row(2, "lost"), &mut loser).unwrap();
        session.log.flush().unwrap();
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!(report.losers, 1);
        assert_eq!(report.undone, 1);
        assert_eq!(report.max_txn_id, loser.id());
        assert_eq!(rows(&session.table(first)), vec![row(1, "kept")]);

        let last = session.log.read().unwrap().pop().unwrap();
        assert_eq!(last.txn_id(), loser.id());
        assert_eq!(last.body, LogBody::Abort);
    }

    #[test]
    fn stolen_pages_of_losers_are_rolled_back() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut setup = session.txns.begin().unwrap();
        let a = heap.insert_tuple(&row(1, "a"), &mut setup).unwrap();
        let b = heap.insert_tuple(&row(2, "b"), &mut setup).unwrap();
        session.txns.commit(&mut setup).unwrap();

        let mut loser = session.txns.begin().unwrap();
        heap.update_tuple(a, &row(1, "changed"), &mut loser).unwrap();
        heap.mark_delete(b, &mut loser).unwrap();
        heap.insert_tuple(&row(3, "c"), &mut loser).unwrap();
        // Writing the pages forces the log first.
        session.bpm.flush_all_pages().unwrap();
        assert!(session.log.persistent_lsn() >= loser.prev_lsn());
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!(report.redone, 0);
        assert_eq!(report.undone, 3);
        assert_eq!(rows(&session.table(first)), vec![row(1, "a"), row(2, "b")]);
    }

    #[test]
    fn committed_delete_stays_deleted() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut txn = session.txns.begin().unwrap();
        let rid = heap.insert_tuple(&row(1, "doomed"), &mut txn).unwrap();
        heap.insert_tuple(&row(2, "spared"), &mut txn).unwrap();
        session.txns.commit(&mut txn).unwrap();

        let mut txn = session.txns.begin().unwrap();
        heap.mark_delete(rid, &mut txn).unwrap();
        session.txns.commit(&mut txn).unwrap();
        drop(heap);
        session.crash();

        let (session, _) = Session::recover(&disk);
        let heap = session.table(first);
        assert_eq!(rows(&heap), vec![row(2, "spared")]);

        let mut txn = session.txns.begin().unwrap();
        assert!(heap.rollback_delete(rid, &mut txn).is_err());
        assert_eq!(rows(&heap), vec![row(2, "spared")]);
    }

    #[test]
    fn chain_extension_is_redone() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();
        let filler = "x".repeat(1500);

        let mut txn = session.txns.begin().unwrap();
        for i in 0..6 {
            heap.insert_tuple(&row(i, &filler), &mut txn).unwrap();
        }
        session.txns.commit(&mut txn).unwrap();
        let pages = heap.page_ids().unwrap();
        assert!(pages.len() >= 3);
        drop(heap);
        session.crash();

        let (session, _) = Session::recover(&disk);
        let heap = session.table(first);
        assert_eq!(heap.page_ids().unwrap(), pages);
        let ids: Vec<_> = rows(&heap)
            .iter()
            .map(|t| t.value(0).and_then(Value::as_i32).unwrap())
            .collect();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn redo_is_idempotent() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);

        let mut txn = session.txns.begin().unwrap();
        let rid = heap.insert_tuple(&row(1, "one"), &mut txn).unwrap();
        heap.insert_tuple(&row(2, "two"), &mut txn).unwrap();
        heap.update_tuple(rid, &row(1, "uno"), &mut txn).unwrap();
        heap.mark_delete(rid, &mut txn).unwrap();
        session.txns.commit(&mut txn).unwrap();
        drop(heap);
        session.crash();

        let (session, records) = Session::start(&disk);
        let recovery = Recovery::new(&session.bpm, &session.log);
        let first = recovery.redo(&records).unwrap();
        session.bpm.flush_all_pages().unwrap();
        let once = page_images(&disk);

        let second = recovery.redo(&records).unwrap();
        session.bpm.flush_all_pages().unwrap();
        assert!(first > 0);
        assert_eq!(second, 0);
        assert_eq!(page_images(&disk), once);

        session.bpm.discard_all().unwrap();
        assert_eq!(recovery.redo(&records).unwrap(), 0);
        session.bpm.flush_all_pages().unwrap();
        assert_eq!(page_images(&disk), once);
    }

    #[test]
    fn second_recovery_is_a_no_op() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut loser = session.txns.begin().unwrap();
        heap.insert_tuple(&row(1, "lost"), &mut loser).unwrap();
        session.log.flush().unwrap();
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!(report.losers, 1);
        let images = page_images(&disk);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!((report.redone, report.undone, report.losers), (0, 0, 0));
        assert_eq!(page_images(&disk), images);
        assert!(rows(&session.table(first)).is_empty());

        let txn = session.txns.begin().unwrap();
        assert!(txn.id() > loser.id());
    }

    #[test]
    fn interrupted_abort_is_completed() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let mut setup = session.txns.begin().unwrap();
        let rid = heap.insert_tuple(&row(1, "base"), &mut setup).unwrap();
        session.txns.commit(&mut setup).unwrap();

        // Undo the update by hand but crash before ABORT is written.
        let mut loser = session.txns.begin().unwrap();
        heap.update_tuple(rid, &row(1, "next"), &mut loser).unwrap();
        heap.restore_tuple(rid, &row(1, "base").serialize(&schema()).unwrap(), &mut loser)
            .unwrap();
        heap.mark_delete(rid, &mut loser).unwrap();
        session.log.flush().unwrap();
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!(report.undone, 3);
        assert_eq!(rows(&session.table(first)), vec![row(1, "base")]);
    }

    #[test]
    fn loser_shrink_is_undone_after_others_fill_the_page() {
        let disk = Arc::new(DiskManager::in_memory());
        let (session, _) = Session::start(&disk);
        let heap = create(&session);
        let first = heap.first_page_id();

        let big = row(1, &"x".repeat(2000));
        let mut setup = session.txns.begin().unwrap();
        let rid = heap.insert_tuple(&big, &mut setup).unwrap();
        session.txns.commit(&mut setup).unwrap();

        let mut loser = session.txns.begin().unwrap();
        heap.update_tuple(rid, &row(1, "a"), &mut loser).unwrap();

        let mut winner = session.txns.begin().unwrap();
        let mut next_id = 2;
        while heap
            .insert_tuple(&row(next_id, &"f".repeat(100)), &mut winner)
            .unwrap()
            .page_id
            == first
        {
            next_id += 1;
        }
        session.txns.commit(&mut winner).unwrap();
        drop(heap);
        session.crash();

        let (session, report) = Session::recover(&disk);
        assert_eq!(report.undone, 1);
        let heap = session.table(first);
        assert_eq!(heap.get_tuple(rid).unwrap(), big);
        assert_eq!(heap.scan().unwrap().len(), next_id as usize);
    }
}
