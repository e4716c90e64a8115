//! Table heap: a table as a chain of slotted pages.

use super::iter::TableIter;
use crate::buffer::{BufferPoolManager, PageGuard};
use crate::error::{CoreError, CoreResult};
use crate::page::{Page, PageKind, SlotState, TablePage};
use crate::transaction::{Transaction, WriteKind};
use crate::tuple::{Schema, Tuple};
use crate::types::{Lsn, Oid, PageId, Rid};
use crate::wal::{LogBody, LogManager, LogRecord};
use std::sync::Arc;
use tracing::debug;

/// A table stored as a linked list of table pages.
///
/// Every mutation follows the same sequence while holding the page's write
/// latch: change a copy of the page, append the log record, then install the
/// copy stamped with the record's LSN. A failed append leaves the page as it
/// was, and no reader sees a change that is not yet logged.
#[derive(Clone)]
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    log: Arc<LogManager>,
    oid: Oid,
    first_page_id: PageId,
    schema: Arc<Schema>,
}

impl TableHeap {
    /// Creates a table with one empty page and logs the page creation.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is available or logging fails.
    pub fn create(
        bpm: Arc<BufferPoolManager>,
        log: Arc<LogManager>,
        oid: Oid,
        schema: Arc<Schema>,
        txn: &mut Transaction,
    ) -> CoreResult<Self> {
        txn.ensure_active()?;
        let first_page_id = {
            let guard = bpm.new_page(|id| Page::Table(TablePage::new(id, oid)))?;
            let mut page = guard.write();
            let lsn = append(
                &log,
                txn,
                LogBody::NewPage {
                    prev_page_id: PageId::INVALID,
                    page_id: guard.page_id(),
                    oid,
                },
            )?;
            page.as_table_mut()?.set_lsn(lsn);
            guard.page_id()
        };
        debug!(%oid, %first_page_id, "table created");
        Ok(Self::open(bpm, log, oid, first_page_id, schema))
    }

    /// Opens an existing table whose chain starts at `first_page_id`.
    #[must_use]
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        log: Arc<LogManager>,
        oid: Oid,
        first_page_id: PageId,
        schema: Arc<Schema>,
    ) -> Self {
        Self {
            bpm,
            log,
            oid,
            first_page_id,
            schema,
        }
    }

    /// The table's oid.
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// First page of the chain.
    #[must_use]
    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Schema used to encode and decode tuples.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Page ids of the chain in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a page cannot be fetched.
    pub fn page_ids(&self) -> CoreResult<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut page_id = self.first_page_id;
        while page_id.is_valid() {
            ids.push(page_id);
            let guard = self.bpm.fetch_page(page_id, PageKind::Table)?;
            let next = guard.read().as_table()?.next_page_id();
            page_id = next;
        }
        Ok(ids)
    }

    /// Inserts a tuple into the first page with room, appending a page to
    /// the chain when every page is full.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] if the tuple does not fit the
    /// schema, [`CoreError::TupleTooLarge`] if it cannot fit on an empty
    /// page, or buffer and log errors.
    pub fn insert_tuple(&self, tuple: &Tuple, txn: &mut Transaction) -> CoreResult<Rid> {
        txn.ensure_active()?;
        let bytes = tuple.serialize(&self.schema)?;
        if bytes.len() > TablePage::MAX_TUPLE_SIZE {
            return Err(CoreError::TupleTooLarge {
                size: bytes.len(),
                capacity: TablePage::MAX_TUPLE_SIZE,
            });
        }

        let mut page_id = self.first_page_id;
        let rid = loop {
            let guard = self.bpm.fetch_page(page_id, PageKind::Table)?;
            let (fits, next) = {
                let page = guard.read();
                let table = page.as_table()?;
                (table.has_room_for(bytes.len()), table.next_page_id())
            };

            if fits {
                let mut page = guard.write();
                let inserted = apply_logged(&self.log, txn, page.as_table_mut()?, |table| {
                    let Some(slot) = table.insert_tuple(&bytes) else {
                        return Ok((None, None));
                    };
                    let rid = Rid::new(page_id, slot);
                    let body = LogBody::Insert {
                        rid,
                        tuple: bytes.clone(),
                    };
                    Ok((Some(rid), Some(body)))
                })?;
                if let Some(rid) = inserted {
                    break rid;
                }
            }

            if next.is_valid() {
                page_id = next;
            } else {
                page_id = self.extend(&guard, txn)?;
            }
        };

        txn.record_write(rid, WriteKind::Insert, self);
        Ok(rid)
    }

    /// Tombstones a tuple. The tuple disappears from scans but keeps its
    /// space until the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] if `rid` is not a live tuple of
    /// this table.
    pub fn mark_delete(&self, rid: Rid, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        self.mutate(rid, txn, |table| {
            let tuple = table
                .tuple(rid.slot)
                .ok_or(CoreError::TupleNotFound { rid })?
                .to_vec();
            table.mark_delete(rid.slot);
            Ok(((), LogBody::MarkDelete { rid, tuple }))
        })?;
        txn.record_write(rid, WriteKind::Delete, self);
        Ok(())
    }

    /// Removes a live or tombstoned tuple for good and returns its image.
    ///
    /// Called at commit for tombstoned tuples and on abort to undo inserts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] if the slot is already gone.
    pub fn apply_delete(&self, rid: Rid, txn: &mut Transaction) -> CoreResult<Vec<u8>> {
        txn.ensure_active()?;
        self.mutate(rid, txn, |table| {
            let tuple = table
                .apply_delete(rid.slot)
                .ok_or(CoreError::TupleNotFound { rid })?;
            Ok((tuple.clone(), LogBody::ApplyDelete { rid, tuple }))
        })
    }

    /// Clears a tombstone, making the tuple visible again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] if the tuple is gone, or
    /// [`CoreError::InvalidOperation`] if it is not tombstoned.
    pub fn rollback_delete(&self, rid: Rid, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        self.mutate(rid, txn, |table| {
            match table.slot_state(rid.slot) {
                Some(SlotState::Tombstoned) => {}
                Some(SlotState::Live) => {
                    return Err(CoreError::invalid_operation(format!(
                        "tuple {rid} is not marked deleted"
                    )))
                }
                Some(SlotState::Gone) | None => return Err(CoreError::TupleNotFound { rid }),
            }
            let tuple = table
                .raw_tuple(rid.slot)
                .ok_or(CoreError::TupleNotFound { rid })?
                .to_vec();
            table.rollback_delete(rid.slot);
            Ok(((), LogBody::RollbackDelete { rid, tuple }))
        })
    }

    /// Overwrites a tuple in place, keeping its RID.
    ///
    /// Returns `Ok(false)` without changing anything when the page has no
    /// room for the new image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] if `rid` is not a live tuple of
    /// this table, or [`CoreError::SchemaMismatch`] for a malformed tuple.
    pub fn update_tuple(
        &self,
        rid: Rid,
        tuple: &Tuple,
        txn: &mut Transaction,
    ) -> CoreResult<bool> {
        txn.ensure_active()?;
        let new = tuple.serialize(&self.schema)?;
        let old = self.overwrite(rid, &new, txn)?;
        match old {
            Some(old) => {
                txn.record_write(rid, WriteKind::Update { old }, self);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Puts back the image a tuple had before an update. Used on abort.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the page no longer has
    /// room for the old image.
    pub fn restore_tuple(&self, rid: Rid, old: &[u8], txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        match self.overwrite(rid, old, txn)? {
            Some(_) => Ok(()),
            None => Err(CoreError::invalid_operation(format!(
                "no room to restore tuple {rid}"
            ))),
        }
    }

    /// Puts a removed tuple back into its old slot, logged as an insert.
    ///
    /// Used on abort after a failed commit already removed tuples the
    /// transaction had tombstoned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorruption`] if the slot is in use or the
    /// page has no room for the image.
    pub fn reinsert_tuple(&self, rid: Rid, image: &[u8], txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        self.mutate(rid, txn, |table| {
            table.insert_tuple_at(rid.slot, image)?;
            let body = LogBody::Insert {
                rid,
                tuple: image.to_vec(),
            };
            Ok(((), body))
        })
    }

    /// Reads a live tuple.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] unless `rid` is a live tuple of
    /// this table.
    pub fn get_tuple(&self, rid: Rid) -> CoreResult<Tuple> {
        let guard = self.bpm.fetch_page(rid.page_id, PageKind::Table)?;
        let page = guard.read();
        let table = page.as_table()?;
        if table.oid() != self.oid {
            return Err(CoreError::TupleNotFound { rid });
        }
        let bytes = table
            .tuple(rid.slot)
            .ok_or(CoreError::TupleNotFound { rid })?;
        Tuple::deserialize(bytes, &self.schema)
    }

    /// Lazily walks the chain, yielding live tuples in page and slot order.
    #[must_use]
    pub fn iter(&self) -> TableIter<'_> {
        TableIter::new(self, self.first_page_id)
    }

    /// Collects every live tuple with its RID.
    ///
    /// # Errors
    ///
    /// Returns the first error met while walking the chain.
    pub fn scan(&self) -> CoreResult<Vec<(Rid, Tuple)>> {
        self.iter().collect()
    }

    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    /// Appends a page after the last page of the chain, which `last` holds
    /// pinned. Returns the new page id.
    fn extend(
        &self,
        last: &PageGuard<'_>,
        txn: &mut Transaction,
    ) -> CoreResult<PageId> {
        let oid = self.oid;
        let new = self
            .bpm
            .new_page(|id| Page::Table(TablePage::new(id, oid)))?;
        let mut last_page = last.write();
        let mut new_page = new.write();

        let lsn = append(
            &self.log,
            txn,
            LogBody::NewPage {
                prev_page_id: last.page_id(),
                page_id: new.page_id(),
                oid: self.oid,
            },
        )?;
        let last_table = last_page.as_table_mut()?;
        last_table.set_next_page_id(new.page_id());
        last_table.set_lsn(lsn);
        new_page.as_table_mut()?.set_lsn(lsn);

        debug!(oid = %self.oid, page_id = %new.page_id(), "table extended");
        Ok(new.page_id())
    }

    fn overwrite(
        &self,
        rid: Rid,
        image: &[u8],
        txn: &mut Transaction,
    ) -> CoreResult<Option<Vec<u8>>> {
        let guard = self.bpm.fetch_page(rid.page_id, PageKind::Table)?;
        let mut page = guard.write();
        let table = page.as_table_mut()?;
        if table.oid() != self.oid {
            return Err(CoreError::TupleNotFound { rid });
        }
        apply_logged(&self.log, txn, table, |table| {
            let Some(old) = table.update_tuple(rid.slot, image)? else {
                return Ok((None, None));
            };
            let body = LogBody::Update {
                rid,
                old: old.clone(),
                new: image.to_vec(),
            };
            Ok((Some(old), Some(body)))
        })
    }

    /// Runs one logged change against the page holding `rid`.
    fn mutate<R, F>(&self, rid: Rid, txn: &mut Transaction, change: F) -> CoreResult<R>
    where
        F: FnOnce(&mut TablePage) -> CoreResult<(R, LogBody)>,
    {
        let guard = self.bpm.fetch_page(rid.page_id, PageKind::Table)?;
        let mut page = guard.write();
        let table = page.as_table_mut()?;
        if table.oid() != self.oid {
            return Err(CoreError::TupleNotFound { rid });
        }
        apply_logged(&self.log, txn, table, |table| {
            let (out, body) = change(table)?;
            Ok((out, Some(body)))
        })
    }
}

/// Runs `change` on a copy of `table` and installs the copy once the record
/// it produced is logged. A change that returns no record is discarded.
fn apply_logged<R, F>(
    log: &LogManager,
    txn: &mut Transaction,
    table: &mut TablePage,
    change: F,
) -> CoreResult<R>
where
    F: FnOnce(&mut TablePage) -> CoreResult<(R, Option<LogBody>)>,
{
    let mut scratch = table.clone();
    let (out, body) = change(&mut scratch)?;
    if let Some(body) = body {
        let lsn = append(log, txn, body)?;
        scratch.set_lsn(lsn);
        *table = scratch;
    }
    Ok(out)
}

/// Logs `body` as the next record of `txn` and returns its LSN.
fn append(log: &LogManager, txn: &mut Transaction, body: LogBody) -> CoreResult<Lsn> {
    let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), body);
    let lsn = log.append(&mut record)?;
    txn.set_prev_lsn(lsn);
    Ok(lsn)
}

impl std::fmt::Debug for TableHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHeap")
            .field("oid", &self.oid)
            .field("first_page_id", &self.first_page_id)
            .finish_non_exhaustive()
    }
}
