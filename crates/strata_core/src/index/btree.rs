//! Disk-resident B+tree.

use crate::buffer::BufferPoolManager;
use crate::error::{CoreError, CoreResult};
use crate::page::{
    BTreeInternalPage, BTreeLeafPage, Page, PageKind, INTERNAL_PAGE_CAPACITY, LEAF_PAGE_CAPACITY,
};
use crate::types::{Oid, PageId, Rid};
use parking_lot::RwLock;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;
use tracing::{debug, trace};

/// A B+tree of unique `i32` keys.
///
/// A leaf splits once it holds more than `leaf_max_size` entries and an
/// internal node once it has more than `internal_max_size` children. Nodes
/// never merge: removal only deletes the leaf entry.
///
/// Readers share the tree latch; writers hold it exclusively. Page latches
/// are never held across a buffer pool call.
///
/// Index changes are not logged. A tree registered in a directory writes
/// every page an insert or remove touched, and the directory page on a
/// root change, straight to disk before the call returns.
///
/// # Example
///
/// ```rust,ignore
/// let tree = BPlusTree::new(bpm, Oid::new(10)).with_fanout(4, 4);
/// tree.insert(42, rid)?;
/// assert_eq!(tree.get(42)?, Some(rid));
/// let tail = tree.range(40..)?;
/// ```
pub struct BPlusTree {
    bpm: Arc<BufferPoolManager>,
    oid: Oid,
    /// Header page holding `oid -> root`, rewritten on every root change.
    directory: Option<PageId>,
    root: RwLock<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates an empty tree. The root leaf is allocated by the first insert.
    pub fn new(bpm: Arc<BufferPoolManager>, oid: Oid) -> Self {
        Self::open(bpm, oid, PageId::INVALID)
    }

    /// Opens a tree rooted at `root`.
    pub fn open(bpm: Arc<BufferPoolManager>, oid: Oid, root: PageId) -> Self {
        Self {
            bpm,
            oid,
            directory: None,
            root: RwLock::new(root),
            leaf_max_size: LEAF_PAGE_CAPACITY - 1,
            internal_max_size: INTERNAL_PAGE_CAPACITY - 1,
        }
    }

    /// Records root changes in the header page `header_page_id`, which must
    /// already hold an entry for this tree's oid.
    #[must_use]
    pub fn with_directory(mut self, header_page_id: PageId) -> Self {
        self.directory = Some(header_page_id);
        self
    }

    /// Lowers the split thresholds. Values are clamped to the minimum a split
    /// needs, and below page capacity so an overflowing node still encodes.
    #[must_use]
    pub fn with_fanout(mut self, leaf_max_size: usize, internal_max_size: usize) -> Self {
        self.leaf_max_size = leaf_max_size.clamp(2, LEAF_PAGE_CAPACITY - 1);
        self.internal_max_size = internal_max_size.clamp(3, INTERNAL_PAGE_CAPACITY - 1);
        self
    }

    /// The index oid.
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Current root, or [`PageId::INVALID`] before the first insert.
    #[must_use]
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// Returns buffer pool errors, or [`CoreError::PageCorruption`] if a
    /// node is not a B+tree page.
    pub fn get(&self, key: i32) -> CoreResult<Option<Rid>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(None);
        }
        let leaf_id = self.find_leaf(*root, Some(key))?;
        let guard = self.bpm.fetch_page(leaf_id, PageKind::BTreeLeaf)?;
        let rid = guard.read().as_leaf()?.lookup(key);
        Ok(rid)
    }

    /// Inserts `key -> rid`. Returns false, changing nothing, if the key is
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns buffer pool errors, typically
    /// [`CoreError::BufferPoolExhausted`] during a split.
    pub fn insert(&self, key: i32, rid: Rid) -> CoreResult<bool> {
        let mut root = self.root.write();
        let mut touched = Vec::new();
        let inserted = self.insert_locked(&mut root, key, rid, &mut touched)?;
        self.persist(touched)?;
        Ok(inserted)
    }

    fn insert_locked(
        &self,
        root: &mut PageId,
        key: i32,
        rid: Rid,
        touched: &mut Vec<PageId>,
    ) -> CoreResult<bool> {
        if !root.is_valid() {
            let guard = self
                .bpm
                .new_page(|id| Page::BTreeLeaf(BTreeLeafPage::new(id, PageId::INVALID)))?;
            guard.write().as_leaf_mut()?.insert(key, rid);
            *root = guard.page_id();
            touched.push(*root);
            drop(guard);
            self.publish_root(*root, touched)?;
            debug!(oid = %self.oid, root = %*root, "index started");
            return Ok(true);
        }

        let leaf_id = self.find_leaf(*root, Some(key))?;
        let guard = self.bpm.fetch_page(leaf_id, PageKind::BTreeLeaf)?;
        let (parent_id, splits) = {
            let page = guard.read();
            let leaf = page.as_leaf()?;
            if leaf.lookup(key).is_some() {
                return Ok(false);
            }
            (leaf.parent_page_id(), leaf.size() + 1 > self.leaf_max_size)
        };
        touched.push(leaf_id);
        if !splits {
            guard.write().as_leaf_mut()?.insert(key, rid);
            return Ok(true);
        }

        // A failed allocation must leave the leaf unchanged.
        let sibling = self
            .bpm
            .new_page(|id| Page::BTreeLeaf(BTreeLeafPage::new(id, parent_id)))?;
        let separator = {
            let mut page = guard.write();
            let leaf = page.as_leaf_mut()?;
            leaf.insert(key, rid);
            let mut sibling_page = sibling.write();
            leaf.move_half_to(sibling_page.as_leaf_mut()?)?
        };
        let sibling_id = sibling.page_id();
        touched.push(sibling_id);
        drop(sibling);
        drop(guard);
        debug!(oid = %self.oid, leaf = %leaf_id, sibling = %sibling_id, "leaf split");
        self.insert_into_parent(root, leaf_id, parent_id, separator, sibling_id, touched)?;
        Ok(true)
    }

    /// Removes `key`. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Returns buffer pool errors.
    pub fn remove(&self, key: i32) -> CoreResult<bool> {
        let root = self.root.write();
        if !root.is_valid() {
            return Ok(false);
        }
        let leaf_id = self.find_leaf(*root, Some(key))?;
        let guard = self.bpm.fetch_page(leaf_id, PageKind::BTreeLeaf)?;
        if guard.read().as_leaf()?.lookup(key).is_none() {
            return Ok(false);
        }
        let removed = guard.write().as_leaf_mut()?.remove(key);
        drop(guard);
        self.persist(vec![leaf_id])?;
        Ok(removed)
    }

    /// Writes `touched` to disk and syncs, for trees registered in a
    /// directory.
    fn persist(&self, mut touched: Vec<PageId>) -> CoreResult<()> {
        if self.directory.is_none() || touched.is_empty() {
            return Ok(());
        }
        touched.sort_unstable();
        touched.dedup();
        for &page_id in &touched {
            self.bpm.flush_page(page_id)?;
        }
        self.bpm.disk().sync_data()?;
        trace!(oid = %self.oid, pages = touched.len(), "index pages written");
        Ok(())
    }

    /// Entries whose keys fall in `range`, in key order.
    ///
    /// # Errors
    ///
    /// Returns buffer pool errors.
    pub fn range<R>(&self, range: R) -> CoreResult<Vec<(i32, Rid)>>
    where
        R: RangeBounds<i32>,
    {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(Vec::new());
        }
        let start = match range.start_bound() {
            Bound::Included(k) | Bound::Excluded(k) => Some(*k),
            Bound::Unbounded => None,
        };

        let mut out = Vec::new();
        let mut leaf_id = self.find_leaf(*root, start)?;
        while leaf_id.is_valid() {
            let guard = self.bpm.fetch_page(leaf_id, PageKind::BTreeLeaf)?;
            let page = guard.read();
            let leaf = page.as_leaf()?;
            for &(key, rid) in leaf.entries() {
                if range.contains(&key) {
                    out.push((key, rid));
                } else if past_end(&range, key) {
                    return Ok(out);
                }
            }
            leaf_id = leaf.next_page_id();
        }
        Ok(out)
    }

    /// Descends to the leaf that covers `key`, or the leftmost leaf.
    fn find_leaf(&self, root: PageId, key: Option<i32>) -> CoreResult<PageId> {
        let mut page_id = root;
        loop {
            let guard = self.bpm.fetch_any(page_id)?;
            let page = guard.read();
            page_id = match &*page {
                Page::BTreeLeaf(_) => return Ok(page_id),
                Page::BTreeInternal(node) => match key {
                    Some(key) => node.lookup(key),
                    None => node.value_at(0),
                },
                other => {
                    return Err(CoreError::page_corruption(format!(
                        "{page_id} in index {} is a {} page",
                        self.oid,
                        other.kind().name()
                    )))
                }
            };
        }
    }

    /// Links `right`, split off from `left`, into `left`'s parent, growing
    /// a new root when `left` was the root.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left: PageId,
        parent_id: PageId,
        separator: i32,
        right: PageId,
        touched: &mut Vec<PageId>,
    ) -> CoreResult<()> {
        if !parent_id.is_valid() {
            let guard = self.bpm.new_page(|id| {
                let mut node = BTreeInternalPage::new(id, PageId::INVALID);
                node.populate_new_root(left, separator, right);
                Page::BTreeInternal(node)
            })?;
            let new_root = guard.page_id();
            drop(guard);
            touched.push(new_root);
            self.set_parent(left, new_root, touched)?;
            self.set_parent(right, new_root, touched)?;
            *root = new_root;
            self.publish_root(new_root, touched)?;
            debug!(oid = %self.oid, root = %new_root, "root split");
            return Ok(());
        }

        let parent = self.bpm.fetch_page(parent_id, PageKind::BTreeInternal)?;
        touched.push(parent_id);
        let (grandparent_id, splits) = {
            let page = parent.read();
            let node = page.as_internal()?;
            (node.parent_page_id(), node.size() + 1 > self.internal_max_size)
        };
        let sibling = if splits {
            Some(
                self.bpm
                    .new_page(|id| Page::BTreeInternal(BTreeInternalPage::new(id, grandparent_id)))?,
            )
        } else {
            None
        };
        parent
            .write()
            .as_internal_mut()?
            .insert_node_after(left, separator, right)
            .ok_or_else(|| {
                CoreError::page_corruption(format!("{left} is not a child of {parent_id}"))
            })?;
        let Some(sibling) = sibling else {
            return Ok(());
        };

        let sibling_id = sibling.page_id();
        touched.push(sibling_id);
        let mut moved = Vec::new();
        let pushed_up = {
            let mut page = parent.write();
            let mut sibling_page = sibling.write();
            page.as_internal_mut()?
                .move_half_to(sibling_page.as_internal_mut()?, |child, _| {
                    moved.push(child);
                    Ok(())
                })?
        };
        drop(sibling);
        drop(parent);
        for child in moved {
            self.set_parent(child, sibling_id, touched)?;
        }
        debug!(oid = %self.oid, node = %parent_id, sibling = %sibling_id, "internal split");
        self.insert_into_parent(root, parent_id, grandparent_id, pushed_up, sibling_id, touched)
    }

    fn set_parent(
        &self,
        child: PageId,
        parent: PageId,
        touched: &mut Vec<PageId>,
    ) -> CoreResult<()> {
        touched.push(child);
        let guard = self.bpm.fetch_any(child)?;
        let mut page = guard.write();
        match &mut *page {
            Page::BTreeLeaf(leaf) => leaf.set_parent_page_id(parent),
            Page::BTreeInternal(node) => node.set_parent_page_id(parent),
            other => {
                return Err(CoreError::page_corruption(format!(
                    "{child} in index {} is a {} page",
                    self.oid,
                    other.kind().name()
                )))
            }
        }
        Ok(())
    }

    fn publish_root(&self, root: PageId, touched: &mut Vec<PageId>) -> CoreResult<()> {
        let Some(directory) = self.directory else {
            return Ok(());
        };
        touched.push(directory);
        let guard = self.bpm.fetch_page(directory, PageKind::Header)?;
        let mut page = guard.write();
        if page.as_header_mut()?.update_record(self.oid, root) {
            Ok(())
        } else {
            Err(CoreError::TableNotFound { oid: self.oid })
        }
    }
}

fn past_end<R: RangeBounds<i32>>(range: &R, key: i32) -> bool {
    match range.end_bound() {
        Bound::Included(end) => key > *end,
        Bound::Excluded(end) => key >= *end,
        Bound::Unbounded => false,
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("oid", &self.oid)
            .field("root", &self.root_page_id())
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .finish_non_exhaustive()
    }
}
