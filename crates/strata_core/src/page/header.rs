//! Directory page mapping table ids to their first page.
//!
//! ```text
//! | page_id (4) | page_type (4) | next_page_id (4) | count (4) | [oid (4), first_page_id (4)] * count |
//! ```
//!
//! Page 0 is always a header page; further header pages chain through
//! `next_page_id` once it fills up.

use super::codec::{read_count, read_i32, write_i32};
use super::PageKind;
use crate::error::CoreResult;
use crate::types::{Oid, PageId, PAGE_SIZE};

const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;

/// Maximum number of directory entries per header page.
pub const HEADER_PAGE_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// A directory page of `(oid, first_page_id)` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    page_id: PageId,
    next_page_id: PageId,
    records: Vec<(Oid, PageId)>,
}

impl HeaderPage {
    /// Creates an empty header page.
    #[must_use]
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            next_page_id: PageId::INVALID,
            records: Vec::new(),
        }
    }

    /// Returns the page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Next header page in the chain.
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Links the next header page.
    pub fn set_next_page_id(&mut self, next: PageId) {
        self.next_page_id = next;
    }

    /// Number of records stored.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no further record fits.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= HEADER_PAGE_CAPACITY
    }

    /// Adds a record. Returns false if the oid is already present or the
    /// page is full.
    pub fn insert_record(&mut self, oid: Oid, first_page_id: PageId) -> bool {
        if self.is_full() || self.get_record(oid).is_some() {
            return false;
        }
        self.records.push((oid, first_page_id));
        true
    }

    /// Looks up the first page of a table.
    #[must_use]
    pub fn get_record(&self, oid: Oid) -> Option<PageId> {
        self.records
            .iter()
            .find(|(o, _)| *o == oid)
            .map(|(_, first)| *first)
    }

    /// Repoints an existing record. Returns false if the oid is absent.
    pub fn update_record(&mut self, oid: Oid, first_page_id: PageId) -> bool {
        match self.records.iter_mut().find(|(o, _)| *o == oid) {
            Some(entry) => {
                entry.1 = first_page_id;
                true
            }
            None => false,
        }
    }

    /// All records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[(Oid, PageId)] {
        &self.records
    }

    /// Encodes the page into exactly `PAGE_SIZE` bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        write_i32(&mut buf, 0, self.page_id.as_i32());
        write_i32(&mut buf, 4, PageKind::Header.tag());
        write_i32(&mut buf, 8, self.next_page_id.as_i32());
        write_i32(&mut buf, 12, self.records.len() as i32);
        for (i, (oid, first)) in self.records.iter().enumerate() {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            write_i32(&mut buf, at, oid.as_i32());
            write_i32(&mut buf, at + 4, first.as_i32());
        }
        buf
    }

    /// Decodes a header page image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PageCorruption`] if the record count
    /// exceeds the page capacity.
    pub fn deserialize(bytes: &[u8]) -> CoreResult<Self> {
        let count = read_count(bytes, 12, HEADER_PAGE_CAPACITY, "header page")?;
        let records = (0..count)
            .map(|i| {
                let at = HEADER_SIZE + i * ENTRY_SIZE;
                (
                    Oid::new(read_i32(bytes, at)),
                    PageId::new(read_i32(bytes, at + 4)),
                )
            })
            .collect();
        Ok(Self {
            page_id: PageId::new(read_i32(bytes, 0)),
            next_page_id: PageId::new(read_i32(bytes, 8)),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_roundtrip() {
        let mut page = HeaderPage::new(PageId::new(0));
        assert!(page.insert_record(Oid::new(1), PageId::new(3)));
        assert!(page.insert_record(Oid::new(2), PageId::new(7)));
        assert!(!page.insert_record(Oid::new(1), PageId::new(9)));
        assert!(page.update_record(Oid::new(2), PageId::new(8)));
        assert!(!page.update_record(Oid::new(5), PageId::new(8)));

        let decoded = HeaderPage::deserialize(&page.serialize()).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(decoded.get_record(Oid::new(2)), Some(PageId::new(8)));
        assert_eq!(decoded.get_record(Oid::new(4)), None);
    }

    #[test]
    fn fills_up() {
        let mut page = HeaderPage::new(PageId::new(0));
        for i in 0..HEADER_PAGE_CAPACITY {
            assert!(page.insert_record(Oid::new(i as i32), PageId::new(i as i32 + 1)));
        }
        assert!(page.is_full());
        assert!(!page.insert_record(Oid::new(-5), PageId::new(1)));
    }

    #[test]
    fn bad_count_is_corruption() {
        let mut bytes = HeaderPage::new(PageId::new(0)).serialize();
        write_i32(&mut bytes, 12, HEADER_PAGE_CAPACITY as i32 + 1);
        assert!(HeaderPage::deserialize(&bytes).is_err());
    }
}
