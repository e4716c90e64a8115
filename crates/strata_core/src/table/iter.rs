//! Lazy table scan.

use super::heap::TableHeap;
use crate::error::CoreResult;
use crate::page::PageKind;
use crate::tuple::Tuple;
use crate::types::{PageId, Rid};

/// Iterator over the live tuples of a table.
///
/// Holds no pin between steps: each call fetches the current page, looks
/// for the next live slot and releases the page again. Tuples inserted
/// behind the cursor during iteration are not seen.
#[derive(Debug)]
pub struct TableIter<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u32,
}

impl<'a> TableIter<'a> {
    pub(crate) fn new(heap: &'a TableHeap, first_page_id: PageId) -> Self {
        Self {
            heap,
            page_id: first_page_id,
            slot: 0,
        }
    }

    fn step(&mut self) -> CoreResult<Option<(Rid, Tuple)>> {
        while self.page_id.is_valid() {
            let guard = self.heap.bpm().fetch_page(self.page_id, PageKind::Table)?;
            let page = guard.read();
            let table = page.as_table()?;

            let found = (self.slot..table.slot_count())
                .find_map(|slot| table.tuple(slot).map(|bytes| (slot, bytes)));
            if let Some((slot, bytes)) = found {
                let rid = Rid::new(self.page_id, slot);
                let tuple = Tuple::deserialize(bytes, self.heap.schema())?;
                self.slot = slot + 1;
                return Ok(Some((rid, tuple)));
            }

            self.page_id = table.next_page_id();
            self.slot = 0;
        }
        Ok(None)
    }
}

impl Iterator for TableIter<'_> {
    type Item = CoreResult<(Rid, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                // stop after the first failure
                self.page_id = PageId::INVALID;
                Some(Err(e))
            }
        }
    }
}
