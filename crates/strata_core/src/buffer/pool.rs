//! Buffer pool manager.

use super::replacer::{make_replacer, Replacer};
use crate::config::ReplacerKind;
use crate::disk::DiskManager;
use crate::error::{CoreError, CoreResult};
use crate::page::{HeaderPage, Page, PageKind};
use crate::types::{FrameId, PageId};
use crate::wal::LogManager;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

struct Frame {
    page_id: PageId,
    kind: PageKind,
    pin_count: u32,
    dirty: bool,
    page: Arc<RwLock<Page>>,
}

impl Frame {
    fn empty() -> Self {
        Self {
            page_id: PageId::INVALID,
            kind: PageKind::Header,
            pin_count: 0,
            dirty: false,
            page: Arc::new(RwLock::new(Page::Header(HeaderPage::new(PageId::INVALID)))),
        }
    }
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// Fixed-size cache of decoded pages.
///
/// Pages are handed out as [`PageGuard`]s, each holding one pin. A pinned
/// frame is never evicted; the page itself is latched separately through
/// the guard's `read`/`write`. Dirty pages are written back on eviction or
/// flush, after forcing the log up to the page LSN when a log manager is
/// attached.
///
/// Latch order is page latch, then pool state. Do not flush while holding a
/// page latch.
pub struct BufferPoolManager {
    pool_size: usize,
    disk: Arc<DiskManager>,
    log: Option<Arc<LogManager>>,
    state: Mutex<PoolState>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames without WAL enforcement.
    #[must_use]
    pub fn new(pool_size: usize, disk: Arc<DiskManager>, replacer: ReplacerKind) -> Self {
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        // pop() hands out frame 0 first
        let free_list = (0..pool_size).rev().collect();
        Self {
            pool_size,
            disk,
            log: None,
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: make_replacer(replacer),
            }),
        }
    }

    /// Attaches a log manager; dirty pages are then only written once the
    /// log covers their LSN.
    #[must_use]
    pub fn with_log(mut self, log: Arc<LogManager>) -> Self {
        self.log = Some(log);
        self
    }

    /// Number of frames.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The disk manager backing this pool.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Fetches a page, decoding it as `kind` on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BufferPoolExhausted`] when no frame can be
    /// freed, [`CoreError::PageTypeMismatch`] when the page holds another
    /// kind, and I/O errors from the disk.
    pub fn fetch_page(&self, page_id: PageId, kind: PageKind) -> CoreResult<PageGuard<'_>> {
        self.fetch(page_id, Some(kind))
    }

    /// Fetches a page of whatever kind is stored on disk.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_page`](Self::fetch_page), except that an image that
    /// was never written is reported as corruption.
    pub fn fetch_any(&self, page_id: PageId) -> CoreResult<PageGuard<'_>> {
        self.fetch(page_id, None)
    }

    fn fetch(&self, page_id: PageId, kind: Option<PageKind>) -> CoreResult<PageGuard<'_>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id];
            if let Some(kind) = kind {
                let actual = frame.kind;
                if actual != kind {
                    return Err(CoreError::PageTypeMismatch {
                        page_id,
                        expected: kind.name(),
                        actual: actual.name(),
                    });
                }
            }
            frame.pin_count += 1;
            let page = Arc::clone(&frame.page);
            state.replacer.pin(frame_id);
            trace!(%page_id, frame_id, "buffer hit");
            return Ok(PageGuard::new(self, page_id, page));
        }

        let bytes = self.disk.read_page(page_id)?;
        let page = Page::deserialize(page_id, &bytes, kind)?;
        let frame_id = self.obtain_frame(&mut state)?;
        let handle = self.install(&mut state, frame_id, page_id, page, false);
        trace!(%page_id, frame_id, "buffer miss");
        Ok(PageGuard::new(self, page_id, handle))
    }

    /// Allocates a new page and installs the page built by `init`, pinned
    /// and dirty.
    ///
    /// A frame is secured before the page id is allocated, so a failed call
    /// does not consume a page id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BufferPoolExhausted`] when no frame can be
    /// freed, or I/O errors from the disk.
    pub fn new_page<F>(&self, init: F) -> CoreResult<PageGuard<'_>>
    where
        F: FnOnce(PageId) -> Page,
    {
        let mut state = self.state.lock();
        let frame_id = self.obtain_frame(&mut state)?;
        let page_id = match self.disk.allocate_page_id() {
            Ok(id) => id,
            Err(e) => {
                state.free_list.push(frame_id);
                return Err(e);
            }
        };
        let handle = self.install(&mut state, frame_id, page_id, init(page_id), true);
        debug!(%page_id, frame_id, "new page");
        Ok(PageGuard::new(self, page_id, handle))
    }

    /// Releases one pin. `is_dirty` is sticky: it can only set the dirty
    /// flag, never clear it.
    ///
    /// Returns false if the page is not cached or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }
        frame.dirty |= is_dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a cached page to disk if it is dirty.
    ///
    /// Returns false if the page is not cached.
    ///
    /// # Errors
    ///
    /// Propagates log and disk write failures.
    pub fn flush_page(&self, page_id: PageId) -> CoreResult<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        self.write_back(&mut state.frames[frame_id])?;
        Ok(true)
    }

    /// Writes every dirty cached page to disk and syncs the data file.
    ///
    /// # Errors
    ///
    /// Propagates log and disk write failures.
    pub fn flush_all_pages(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let mut written = 0usize;
        for frame in state.frames.iter_mut().filter(|f| f.page_id.is_valid()) {
            if frame.dirty {
                written += 1;
            }
            self.write_back(frame)?;
        }
        drop(state);
        self.disk.sync_data()?;
        debug!(written, "flushed buffer pool");
        Ok(())
    }

    /// Drops every cached page without writing it back.
    ///
    /// Simulates a crash in tests and lets recovery start from disk state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if any page is pinned.
    pub fn discard_all(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.iter().find(|f| f.pin_count > 0) {
            return Err(CoreError::invalid_operation(format!(
                "cannot discard pool: {} is pinned",
                frame.page_id
            )));
        }
        let state = &mut *state;
        for (frame_id, frame) in state.frames.iter_mut().enumerate() {
            if frame.page_id.is_valid() {
                state.replacer.pin(frame_id);
                *frame = Frame::empty();
            }
        }
        state.page_table.clear();
        state.free_list = (0..self.pool_size).rev().collect();
        Ok(())
    }

    /// Pin count of a cached page.
    #[must_use]
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id].pin_count)
    }

    /// Whether a cached page has unflushed changes.
    #[must_use]
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id].dirty)
    }

    fn obtain_frame(&self, state: &mut PoolState) -> CoreResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        let frame_id = state.replacer.victim().ok_or(CoreError::BufferPoolExhausted {
            pool_size: self.pool_size,
        })?;

        let frame = &mut state.frames[frame_id];
        let evicted = frame.page_id;
        if let Err(e) = self.write_back(frame) {
            state.replacer.unpin(frame_id);
            return Err(e);
        }
        state.page_table.remove(&evicted);
        state.frames[frame_id] = Frame::empty();
        debug!(page_id = %evicted, frame_id, "evicted page");
        Ok(frame_id)
    }

    fn install(
        &self,
        state: &mut PoolState,
        frame_id: FrameId,
        page_id: PageId,
        page: Page,
        dirty: bool,
    ) -> Arc<RwLock<Page>> {
        let kind = page.kind();
        let handle = Arc::new(RwLock::new(page));
        state.frames[frame_id] = Frame {
            page_id,
            kind,
            pin_count: 1,
            dirty,
            page: Arc::clone(&handle),
        };
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        handle
    }

    fn write_back(&self, frame: &mut Frame) -> CoreResult<()> {
        if !frame.dirty {
            return Ok(());
        }
        let page = frame.page.read();
        if let Some(log) = &self.log {
            if page.lsn() > log.persistent_lsn() {
                log.flush()?;
            }
        }
        self.disk.write_page(frame.page_id, &page.serialize())?;
        drop(page);
        frame.dirty = false;
        Ok(())
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.pool_size)
            .field("cached", &state.page_table.len())
            .field("evictable", &state.replacer.size())
            .finish_non_exhaustive()
    }
}

/// A pinned page. Dropping the guard releases the pin.
///
/// Taking [`write`](Self::write) marks the page dirty for the unpin.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    page: Arc<RwLock<Page>>,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPoolManager, page_id: PageId, page: Arc<RwLock<Page>>) -> Self {
        Self {
            pool,
            page_id,
            page,
            dirty: Cell::new(false),
        }
    }

    /// Id of the pinned page.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared latch on the page.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Exclusive latch on the page; the page will be unpinned dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.set(true);
        self.page.write()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::TablePage;
    use crate::types::Oid;

    fn pool(size: usize) -> BufferPoolManager {
        BufferPoolManager::new(size, Arc::new(DiskManager::in_memory()), ReplacerKind::Lru)
    }

    fn table_page(id: PageId) -> Page {
        Page::Table(TablePage::new(id, Oid::new(1)))
    }

    #[test]
    fn new_page_is_pinned_and_dirty() {
        let pool = pool(2);
        let guard = pool.new_page(table_page).unwrap();
        let id = guard.page_id();
        assert_eq!(pool.pin_count(id), Some(1));
        assert_eq!(pool.is_dirty(id), Some(true));
        drop(guard);
        assert_eq!(pool.pin_count(id), Some(0));
    }

    #[test]
    fn exhausted_pool_recovers_after_unpin() {
        let pool = pool(3);
        let mut guards: Vec<_> = (0..3).map(|_| pool.new_page(table_page).unwrap()).collect();
        let issued: Vec<PageId> = guards.iter().map(PageGuard::page_id).collect();

        let err = pool.new_page(table_page).unwrap_err();
        assert!(matches!(err, CoreError::BufferPoolExhausted { pool_size: 3 }));
        assert!(err.is_capacity());

        guards.remove(1);
        let fresh = pool.new_page(table_page).unwrap();
        assert!(!issued.contains(&fresh.page_id()));
        assert_eq!(fresh.page_id(), PageId::new(3));
    }

    #[test]
    fn pinned_page_survives_pressure() {
        let pool = pool(2);
        let pinned = pool.new_page(table_page).unwrap();
        for _ in 0..5 {
            let guard = pool.new_page(table_page).unwrap();
            drop(guard);
        }
        assert_eq!(pool.pin_count(pinned.page_id()), Some(1));
    }

    #[test]
    fn dirty_victim_is_written_before_reuse() {
        let pool = pool(1);
        let id = {
            let guard = pool.new_page(table_page).unwrap();
            guard.write().as_table_mut().unwrap().insert_tuple(b"evicted").unwrap();
            guard.page_id()
        };

        let other = pool.new_page(table_page).unwrap();
        assert_ne!(other.page_id(), id);
        assert_eq!(pool.pin_count(id), None);
        drop(other);

        let again = pool.fetch_page(id, PageKind::Table).unwrap();
        let page = again.read();
        assert_eq!(page.as_table().unwrap().tuple(0), Some(&b"evicted"[..]));
        assert!(pool.disk().stats().page_writes >= 1);
    }

    #[test]
    fn dirty_flag_is_sticky() {
        let pool = pool(2);
        let id = pool.new_page(table_page).unwrap().page_id();
        let guard = pool.fetch_page(id, PageKind::Table).unwrap();
        drop(guard);
        assert_eq!(pool.is_dirty(id), Some(true));

        pool.flush_page(id).unwrap();
        assert_eq!(pool.is_dirty(id), Some(false));
        assert!(!pool.unpin_page(id, false));
    }

    #[test]
    fn fetch_with_wrong_kind_fails_without_pinning() {
        let pool = pool(2);
        let id = pool.new_page(table_page).unwrap().page_id();
        let err = pool.fetch_page(id, PageKind::BTreeLeaf).unwrap_err();
        assert!(matches!(err, CoreError::PageTypeMismatch { .. }));
        assert_eq!(pool.pin_count(id), Some(0));
    }

    #[test]
    fn discard_forgets_unflushed_changes() {
        let pool = pool(2);
        let id = pool.new_page(table_page).unwrap().page_id();
        pool.flush_all_pages().unwrap();
        {
            let guard = pool.fetch_page(id, PageKind::Table).unwrap();
            guard.write().as_table_mut().unwrap().insert_tuple(b"lost").unwrap();
        }
        pool.discard_all().unwrap();

        let guard = pool.fetch_page(id, PageKind::Table).unwrap();
        assert_eq!(guard.read().as_table().unwrap().slot_count(), 0);
    }
}
