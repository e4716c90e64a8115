//! Storage doubles shared by unit tests.

use crate::disk::DiskManager;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use strata_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

/// Schedules a sync failure for a [`FaultyBackend`].
#[derive(Debug, Default)]
pub(crate) struct Faults {
    countdown: Mutex<Option<usize>>,
}

impl Faults {
    /// Lets `ok` more syncs through, then fails the next one.
    pub(crate) fn fail_sync_after(&self, ok: usize) {
        *self.countdown.lock() = Some(ok);
    }

    fn sync_fails(&self) -> bool {
        let mut countdown = self.countdown.lock();
        match *countdown {
            Some(0) => {
                *countdown = None;
                true
            }
            Some(n) => {
                *countdown = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// In-memory backend whose syncs fail on demand. Appended bytes land
/// before the failing sync, like a write the OS accepted but never made
/// durable.
pub(crate) struct FaultyBackend {
    inner: InMemoryBackend,
    faults: Arc<Faults>,
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.inner.write_at(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.faults.sync_fails() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected sync failure",
            )));
        }
        self.inner.sync()
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.set_len(new_size)
    }
}

/// A disk manager whose log file can be made to fail. Returns the disk, a
/// view of the log bytes and the fault schedule.
pub(crate) fn faulty_log_disk() -> (Arc<DiskManager>, InMemoryBackend, Arc<Faults>) {
    let wal = InMemoryBackend::new();
    let faults = Arc::new(Faults::default());
    let log = FaultyBackend {
        inner: wal.share(),
        faults: Arc::clone(&faults),
    };
    let disk = DiskManager::new(Box::new(InMemoryBackend::new()), Box::new(log));
    (Arc::new(disk), wal, faults)
}
