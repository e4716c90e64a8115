//! B+tree leaf node.
//!
//! ```text
//! | page_id (4) | page_type (4) | parent (4) | next (4) | count (4) | [key (4), rid.page (4), rid.slot (4)] * count |
//! ```
//!
//! Keys are unique and sorted; leaves are chained through `next` for range
//! scans.

use super::codec::{read_count, read_i32, write_i32};
use super::PageKind;
use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, Rid, PAGE_SIZE};

const HEADER_SIZE: usize = 20;
const ENTRY_SIZE: usize = 12;

/// Maximum number of entries a leaf page can hold.
pub const LEAF_PAGE_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// A leaf node mapping keys to record ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeLeafPage {
    page_id: PageId,
    parent_page_id: PageId,
    next_page_id: PageId,
    entries: Vec<(i32, Rid)>,
}

impl BTreeLeafPage {
    /// Creates an empty leaf.
    #[must_use]
    pub fn new(page_id: PageId, parent_page_id: PageId) -> Self {
        Self {
            page_id,
            parent_page_id,
            next_page_id: PageId::INVALID,
            entries: Vec::new(),
        }
    }

    /// Returns the page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Parent node, or `PageId::INVALID` when this leaf is the root.
    #[must_use]
    pub fn parent_page_id(&self) -> PageId {
        self.parent_page_id
    }

    /// Sets the parent node.
    pub fn set_parent_page_id(&mut self, parent: PageId) {
        self.parent_page_id = parent;
    }

    /// Right sibling in key order.
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Links the right sibling.
    pub fn set_next_page_id(&mut self, next: PageId) {
        self.next_page_id = next;
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Key of entry `index`.
    #[must_use]
    pub fn key_at(&self, index: usize) -> i32 {
        self.entries[index].0
    }

    /// Entries in key order.
    #[must_use]
    pub fn entries(&self) -> &[(i32, Rid)] {
        &self.entries
    }

    /// Index of the first entry whose key is not below `key`.
    #[must_use]
    pub fn key_index(&self, key: i32) -> usize {
        self.entries.partition_point(|(k, _)| *k < key)
    }

    /// Exact-match lookup.
    #[must_use]
    pub fn lookup(&self, key: i32) -> Option<Rid> {
        let index = self.key_index(key);
        self.entries
            .get(index)
            .filter(|(k, _)| *k == key)
            .map(|(_, rid)| *rid)
    }

    /// Inserts in key order. Returns false if `key` is already present.
    pub fn insert(&mut self, key: i32, rid: Rid) -> bool {
        let index = self.key_index(key);
        if self.entries.get(index).is_some_and(|(k, _)| *k == key) {
            return false;
        }
        self.entries.insert(index, (key, rid));
        true
    }

    /// Removes `key`. Returns false if it was absent.
    pub fn remove(&mut self, key: i32) -> bool {
        let index = self.key_index(key);
        if self.entries.get(index).is_some_and(|(k, _)| *k == key) {
            self.entries.remove(index);
            true
        } else {
            false
        }
    }

    /// Removes entry `index`.
    pub fn remove_at(&mut self, index: usize) {
        if index < self.entries.len() {
            self.entries.remove(index);
        }
    }

    /// Moves the upper half of the entries to an empty right sibling and
    /// splices it into the leaf chain. Returns the first key of the
    /// recipient.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the recipient is not empty
    /// or this leaf has fewer than two entries.
    pub fn move_half_to(&mut self, recipient: &mut BTreeLeafPage) -> CoreResult<i32> {
        if !recipient.entries.is_empty() || self.entries.len() < 2 {
            return Err(CoreError::invalid_operation(format!(
                "cannot split leaf {} into {}",
                self.page_id, recipient.page_id
            )));
        }
        let split = self.entries.len() / 2;
        recipient.entries.extend(self.entries.drain(split..));
        recipient.next_page_id = self.next_page_id;
        self.next_page_id = recipient.page_id;
        Ok(recipient.entries[0].0)
    }

    /// Encodes the page into exactly `PAGE_SIZE` bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        write_i32(&mut buf, 0, self.page_id.as_i32());
        write_i32(&mut buf, 4, PageKind::BTreeLeaf.tag());
        write_i32(&mut buf, 8, self.parent_page_id.as_i32());
        write_i32(&mut buf, 12, self.next_page_id.as_i32());
        write_i32(&mut buf, 16, self.entries.len() as i32);
        for (i, (key, rid)) in self.entries.iter().enumerate() {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            write_i32(&mut buf, at, *key);
            write_i32(&mut buf, at + 4, rid.page_id.as_i32());
            write_i32(&mut buf, at + 8, rid.slot as i32);
        }
        buf
    }

    /// Decodes a leaf page image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorruption`] if the entry count exceeds the
    /// page capacity or a slot id is negative.
    pub fn deserialize(bytes: &[u8]) -> CoreResult<Self> {
        let count = read_count(bytes, 16, LEAF_PAGE_CAPACITY, "leaf page")?;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            let slot = u32::try_from(read_i32(bytes, at + 8)).map_err(|_| {
                CoreError::page_corruption(format!("leaf entry {i} has a negative slot"))
            })?;
            entries.push((
                read_i32(bytes, at),
                Rid::new(PageId::new(read_i32(bytes, at + 4)), slot),
            ));
        }
        Ok(Self {
            page_id: PageId::new(read_i32(bytes, 0)),
            parent_page_id: PageId::new(read_i32(bytes, 8)),
            next_page_id: PageId::new(read_i32(bytes, 12)),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rid(n: i32) -> Rid {
        Rid::new(PageId::new(n), n as u32)
    }

    #[test]
    fn sorted_insert_and_lookup() {
        let mut leaf = BTreeLeafPage::new(PageId::new(3), PageId::INVALID);
        for key in [30, 10, 20] {
            assert!(leaf.insert(key, rid(key)));
        }
        assert!(!leaf.insert(20, rid(99)));

        assert_eq!(leaf.key_at(0), 10);
        assert_eq!(leaf.key_at(2), 30);
        assert_eq!(leaf.lookup(20), Some(rid(20)));
        assert_eq!(leaf.lookup(25), None);
        assert_eq!(leaf.key_index(25), 2);

        assert!(leaf.remove(10));
        assert!(!leaf.remove(10));
        assert_eq!(leaf.size(), 2);
    }

    #[test]
    fn split_links_chain() {
        let mut left = BTreeLeafPage::new(PageId::new(3), PageId::new(1));
        left.set_next_page_id(PageId::new(9));
        for key in 0..6 {
            left.insert(key, rid(key));
        }
        let mut right = BTreeLeafPage::new(PageId::new(4), PageId::new(1));

        let first = left.move_half_to(&mut right).unwrap();

        assert_eq!(first, 3);
        assert_eq!(left.size(), 3);
        assert_eq!(right.size(), 3);
        assert_eq!(left.next_page_id(), PageId::new(4));
        assert_eq!(right.next_page_id(), PageId::new(9));
        assert!(left.move_half_to(&mut right).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip(keys in prop::collection::btree_set(any::<i32>(), 0..LEAF_PAGE_CAPACITY)) {
            let mut leaf = BTreeLeafPage::new(PageId::new(8), PageId::new(2));
            leaf.set_next_page_id(PageId::new(12));
            for key in keys {
                leaf.insert(key, Rid::new(PageId::new(key.wrapping_abs()), key as u32 & 0xFFFF));
            }
            let decoded = BTreeLeafPage::deserialize(&leaf.serialize()).unwrap();
            prop_assert_eq!(decoded, leaf);
        }
    }
}
