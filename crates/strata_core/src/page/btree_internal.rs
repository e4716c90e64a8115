//! B+tree internal node.
//!
//! ```text
//! | page_id (4) | page_type (4) | parent (4) | count (4) | [key (4), child (4)] * count |
//! ```
//!
//! Entry 0 carries no key: its child covers every key below `key_at(1)`.
//! The dummy key is stored as 0.

use super::codec::{read_count, read_i32, write_i32};
use super::PageKind;
use crate::error::CoreResult;
use crate::types::{PageId, PAGE_SIZE};

const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;

/// Maximum number of entries an internal page can hold.
pub const INTERNAL_PAGE_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// An internal node mapping key ranges to child pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeInternalPage {
    page_id: PageId,
    parent_page_id: PageId,
    entries: Vec<(i32, PageId)>,
}

impl BTreeInternalPage {
    /// Creates an empty internal page.
    #[must_use]
    pub fn new(page_id: PageId, parent_page_id: PageId) -> Self {
        Self {
            page_id,
            parent_page_id,
            entries: Vec::new(),
        }
    }

    /// Returns the page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Parent node, or `PageId::INVALID` for the root.
    #[must_use]
    pub fn parent_page_id(&self) -> PageId {
        self.parent_page_id
    }

    /// Sets the parent node.
    pub fn set_parent_page_id(&mut self, parent: PageId) {
        self.parent_page_id = parent;
    }

    /// Number of children.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Key of entry `index`. Entry 0 always reports 0.
    #[must_use]
    pub fn key_at(&self, index: usize) -> i32 {
        if index == 0 {
            0
        } else {
            self.entries[index].0
        }
    }

    /// Overwrites the key of entry `index`.
    pub fn set_key_at(&mut self, index: usize, key: i32) {
        if index > 0 {
            self.entries[index].0 = key;
        }
    }

    /// Child of entry `index`.
    #[must_use]
    pub fn value_at(&self, index: usize) -> PageId {
        self.entries[index].1
    }

    /// Position of `child` among the entries.
    #[must_use]
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        self.entries.iter().position(|(_, c)| *c == child)
    }

    /// Child whose range contains `key`: the entry with the largest key not
    /// above `key`, falling back to entry 0.
    #[must_use]
    pub fn lookup(&self, key: i32) -> PageId {
        if self.entries.len() <= 1 {
            return self.entries.first().map_or(PageId::INVALID, |(_, c)| *c);
        }
        // first keyed entry strictly above the probe
        let above = self.entries[1..].partition_point(|(k, _)| *k <= key) + 1;
        self.entries[above - 1].1
    }

    /// Turns this empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: i32, right: PageId) {
        self.entries.clear();
        self.entries.push((0, left));
        self.entries.push((key, right));
    }

    /// Inserts `(key, new_child)` right after the entry pointing at
    /// `old_child`. Returns the new size, or `None` if `old_child` is not a
    /// child of this page.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: i32,
        new_child: PageId,
    ) -> Option<usize> {
        let index = self.value_index(old_child)?;
        self.entries.insert(index + 1, (key, new_child));
        Some(self.entries.len())
    }

    /// Removes entry `index`, shifting later entries down.
    pub fn remove(&mut self, index: usize) {
        if index < self.entries.len() {
            self.entries.remove(index);
            if index == 0 {
                if let Some(first) = self.entries.first_mut() {
                    first.0 = 0;
                }
            }
        }
    }

    /// Moves the upper half of the entries to an empty sibling.
    ///
    /// Returns the separator key to push into the parent; in the recipient
    /// it becomes the dummy key of entry 0. `reparent` is called for every
    /// moved child so it can point back at the recipient.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `reparent`.
    pub fn move_half_to<F>(
        &mut self,
        recipient: &mut BTreeInternalPage,
        mut reparent: F,
    ) -> CoreResult<i32>
    where
        F: FnMut(PageId, PageId) -> CoreResult<()>,
    {
        let split = self.entries.len() / 2;
        let moved: Vec<_> = self.entries.drain(split..).collect();
        let separator = moved.first().map_or(0, |(k, _)| *k);

        recipient.entries.extend(moved);
        if let Some(first) = recipient.entries.first_mut() {
            first.0 = 0;
        }
        for (_, child) in &recipient.entries {
            reparent(*child, recipient.page_id)?;
        }
        Ok(separator)
    }

    /// Encodes the page into exactly `PAGE_SIZE` bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        write_i32(&mut buf, 0, self.page_id.as_i32());
        write_i32(&mut buf, 4, PageKind::BTreeInternal.tag());
        write_i32(&mut buf, 8, self.parent_page_id.as_i32());
        write_i32(&mut buf, 12, self.entries.len() as i32);
        for (i, (key, child)) in self.entries.iter().enumerate() {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            write_i32(&mut buf, at, if i == 0 { 0 } else { *key });
            write_i32(&mut buf, at + 4, child.as_i32());
        }
        buf
    }

    /// Decodes an internal page image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::PageCorruption`] if the entry count
    /// exceeds the page capacity.
    pub fn deserialize(bytes: &[u8]) -> CoreResult<Self> {
        let count = read_count(bytes, 12, INTERNAL_PAGE_CAPACITY, "internal page")?;
        let entries = (0..count)
            .map(|i| {
                let at = HEADER_SIZE + i * ENTRY_SIZE;
                (read_i32(bytes, at), PageId::new(read_i32(bytes, at + 4)))
            })
            .collect();
        Ok(Self {
            page_id: PageId::new(read_i32(bytes, 0)),
            parent_page_id: PageId::new(read_i32(bytes, 8)),
            entries,
        })
    }
}
