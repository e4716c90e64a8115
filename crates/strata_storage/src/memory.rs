//! In-memory storage backend.

use crate::backend::{check_read, check_write, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// A backend over a shared byte vector.
///
/// Used by ephemeral engines and by tests. Handles made with
/// [`share`](Self::share) observe the same bytes, so a test can drop an
/// engine without flushing and reopen it against whatever reached "disk".
/// `flush` and `sync` do nothing: every write is already as durable as
/// this backend gets.
///
/// # Example
///
/// ```rust
/// use strata_storage::{StorageBackend, InMemoryBackend};
///
/// let mut log = InMemoryBackend::new();
/// let survivor = log.share();
/// log.append(b"record").unwrap();
/// drop(log);
/// assert_eq!(survivor.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Another handle onto the same bytes.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        check_read(offset, len, bytes.len() as u64)?;
        let start = offset as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        check_write(offset, data.len(), bytes.len() as u64)?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        self.bytes.write().resize(new_size as usize, 0);
        Ok(())
    }
}
