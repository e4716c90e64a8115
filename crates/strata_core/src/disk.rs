//! Disk manager: page-addressed data file and append-only log file.
//!
//! The data file is a sequence of fixed-size pages; page `n` lives at byte
//! offset `n * PAGE_SIZE`. The log file is a concatenation of
//! length-prefixed log records that only ever grows (or is reset).
//!
//! The disk manager is the sole source of page ids. Allocation extends the
//! data file by one zero-filled page under the data-file lock, so concurrent
//! allocators always receive distinct ids.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_storage::{InMemoryBackend, StorageBackend};
use tracing::{debug, warn};

/// I/O counters maintained by the disk manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStats {
    /// Pages read from the data file.
    pub page_reads: u64,
    /// Pages written to the data file.
    pub page_writes: u64,
    /// Pages allocated.
    pub allocations: u64,
    /// Log writes (each one a durable append).
    pub log_flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    page_reads: AtomicU64,
    page_writes: AtomicU64,
    allocations: AtomicU64,
    log_flushes: AtomicU64,
}

/// Raw page and log I/O over two storage backends.
///
/// All failures propagate; nothing is retried or masked.
pub struct DiskManager {
    data: Mutex<Box<dyn StorageBackend>>,
    log: Mutex<Box<dyn StorageBackend>>,
    counters: Counters,
}

impl DiskManager {
    /// Creates a disk manager over a data backend and a log backend.
    pub fn new(data: Box<dyn StorageBackend>, log: Box<dyn StorageBackend>) -> Self {
        Self {
            data: Mutex::new(data),
            log: Mutex::new(log),
            counters: Counters::default(),
        }
    }

    /// Creates a disk manager backed entirely by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Validates the backing files before first use.
    ///
    /// A data file whose length is not a whole number of pages ends in a
    /// torn allocation; the partial page is cut off.
    ///
    /// # Errors
    ///
    /// Returns an error if the backends cannot be inspected or resized.
    pub fn bootstrap(&self) -> CoreResult<()> {
        let mut data = self.data.lock();
        let size = data.size()?;
        let remainder = size % PAGE_SIZE as u64;
        if remainder != 0 {
            warn!(size, "data file ends in a partial page, truncating");
            data.set_len(size - remainder)?;
        }
        Ok(())
    }

    /// Discards every page and log record.
    ///
    /// # Errors
    ///
    /// Returns an error if either backend cannot be truncated.
    pub fn reset(&self) -> CoreResult<()> {
        let mut data = self.data.lock();
        let mut log = self.log.lock();
        data.set_len(0)?;
        data.sync()?;
        log.set_len(0)?;
        log.sync()?;
        debug!("disk manager reset");
        Ok(())
    }

    /// Returns the number of pages in the data file.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn num_pages(&self) -> CoreResult<u32> {
        let size = self.data.lock().size()?;
        Ok((size / PAGE_SIZE as u64) as u32)
    }

    /// Returns true if the data file holds no pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.num_pages()? == 0)
    }

    /// Reserves the next page id by extending the data file with one page.
    ///
    /// # Errors
    ///
    /// Returns an error if the data file cannot be extended.
    pub fn allocate_page_id(&self) -> CoreResult<PageId> {
        let mut data = self.data.lock();
        let size = data.size()?;
        let id = i32::try_from(size / PAGE_SIZE as u64)
            .map_err(|_| CoreError::invalid_operation("page id space exhausted"))?;
        data.set_len(size + PAGE_SIZE as u64)?;
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(page_id = id, "allocated page");
        Ok(PageId::new(id))
    }

    /// Reads exactly one page.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotAllocated`] for ids past the end of the
    /// file, or the underlying I/O error.
    pub fn read_page(&self, page_id: PageId) -> CoreResult<Vec<u8>> {
        if !page_id.is_valid() {
            return Err(CoreError::PageNotAllocated { page_id });
        }
        let data = self.data.lock();
        if page_id.file_offset() + PAGE_SIZE as u64 > data.size()? {
            return Err(CoreError::PageNotAllocated { page_id });
        }
        let bytes = data.read_at(page_id.file_offset(), PAGE_SIZE)?;
        self.counters.page_reads.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }

    /// Writes exactly one page over an already allocated slot.
    ///
    /// The data file is never extended by a write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotAllocated`] if the page lies past the end
    /// of the file, or the underlying I/O error.
    pub fn write_page(&self, page_id: PageId, bytes: &[u8]) -> CoreResult<()> {
        if bytes.len() != PAGE_SIZE {
            return Err(CoreError::invalid_operation(format!(
                "page image is {} bytes, expected {PAGE_SIZE}",
                bytes.len()
            )));
        }
        if !page_id.is_valid() {
            return Err(CoreError::PageNotAllocated { page_id });
        }
        let mut data = self.data.lock();
        if page_id.file_offset() + PAGE_SIZE as u64 > data.size()? {
            return Err(CoreError::PageNotAllocated { page_id });
        }
        data.write_at(page_id.file_offset(), bytes)?;
        data.flush()?;
        self.counters.page_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Forces written pages to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync_data(&self) -> CoreResult<()> {
        self.data.lock().sync()?;
        Ok(())
    }

    /// Reads the whole log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn read_log(&self) -> CoreResult<Vec<u8>> {
        let log = self.log.lock();
        let size = log.size()?;
        let len = usize::try_from(size)
            .map_err(|_| CoreError::log_corruption("log file too large to read"))?;
        Ok(log.read_at(0, len)?)
    }

    /// Appends bytes to the log file and makes them durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or sync fails. The log is then cut
    /// back to its length before the call, so a retry of the same bytes
    /// does not repeat a prefix.
    pub fn write_log(&self, bytes: &[u8]) -> CoreResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut log = self.log.lock();
        let start = log.size()?;
        let written = log.append(bytes).and_then(|_| log.sync());
        if let Err(e) = written {
            if let Err(undo) = log.set_len(start) {
                warn!(error = %undo, len = start, "could not cut back a failed log write");
            }
            return Err(e.into());
        }
        self.counters.log_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Cuts the log file back to `len` bytes.
    ///
    /// Used once at startup to drop a torn final record so later appends
    /// follow the last complete one.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be resized.
    pub fn truncate_log(&self, len: u64) -> CoreResult<()> {
        let mut log = self.log.lock();
        if log.size()? > len {
            log.set_len(len)?;
            log.sync()?;
        }
        Ok(())
    }

    /// Returns the current size of the log file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn log_size(&self) -> CoreResult<u64> {
        Ok(self.log.lock().size()?)
    }

    /// Returns a snapshot of the I/O counters.
    #[must_use]
    pub fn stats(&self) -> DiskStats {
        DiskStats {
            page_reads: self.counters.page_reads.load(Ordering::Relaxed),
            page_writes: self.counters.page_writes.load(Ordering::Relaxed),
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            log_flushes: self.counters.log_flushes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use strata_storage::FileBackend;
    use tempfile::tempdir;

    #[test]
    fn allocation_extends_file() {
        let disk = DiskManager::in_memory();
        assert!(disk.is_empty().unwrap());

        assert_eq!(disk.allocate_page_id().unwrap(), PageId::new(0));
        assert_eq!(disk.allocate_page_id().unwrap(), PageId::new(1));
        assert_eq!(disk.num_pages().unwrap(), 2);
        assert!(!disk.is_empty().unwrap());
    }

    #[test]
    fn write_then_read_page() {
        let disk = DiskManager::in_memory();
        let id = disk.allocate_page_id().unwrap();

        let mut image = vec![0u8; PAGE_SIZE];
        image[0] = 0xAB;
        image[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(id, &image).unwrap();

        assert_eq!(disk.read_page(id).unwrap(), image);
        assert_eq!(disk.stats().page_writes, 1);
        assert_eq!(disk.stats().page_reads, 1);
    }

    #[test]
    fn write_never_extends_file() {
        let disk = DiskManager::in_memory();
        let result = disk.write_page(PageId::new(0), &vec![0u8; PAGE_SIZE]);
        assert!(matches!(result, Err(CoreError::PageNotAllocated { .. })));

        let result = disk.read_page(PageId::new(5));
        assert!(matches!(result, Err(CoreError::PageNotAllocated { .. })));
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let disk = Arc::new(DiskManager::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let disk = Arc::clone(&disk);
                thread::spawn(move || {
                    (0..25)
                        .map(|_| disk.allocate_page_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<PageId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(disk.num_pages().unwrap(), 200);
    }

    #[test]
    fn log_appends_and_reset() {
        let disk = DiskManager::in_memory();
        disk.write_log(b"abc").unwrap();
        disk.write_log(b"def").unwrap();
        assert_eq!(disk.read_log().unwrap(), b"abcdef");

        disk.allocate_page_id().unwrap();
        disk.reset().unwrap();
        assert!(disk.read_log().unwrap().is_empty());
        assert!(disk.is_empty().unwrap());
    }

    #[test]
    fn failed_log_write_is_cut_back() {
        let (disk, wal, faults) = crate::testing::faulty_log_disk();
        disk.write_log(b"commit-1|").unwrap();

        faults.fail_sync_after(0);
        assert!(disk.write_log(b"commit-2|").is_err());
        assert_eq!(wal.data(), b"commit-1|");

        disk.write_log(b"commit-2|").unwrap();
        assert_eq!(disk.read_log().unwrap(), b"commit-1|commit-2|");
        assert_eq!(disk.stats().log_flushes, 2);
    }

    #[test]
    fn bootstrap_trims_partial_page() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("data.db");
        {
            let mut backend = FileBackend::open(&data_path).unwrap();
            backend.set_len(PAGE_SIZE as u64 + 100).unwrap();
        }

        let disk = DiskManager::new(
            Box::new(FileBackend::open(&data_path).unwrap()),
            Box::new(FileBackend::open(&dir.path().join("wal.log")).unwrap()),
        );
        disk.bootstrap().unwrap();
        assert_eq!(disk.num_pages().unwrap(), 1);
    }
}
