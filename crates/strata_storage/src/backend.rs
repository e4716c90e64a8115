//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A byte store underneath the disk manager.
///
/// Backends are opaque: they know nothing of pages or log records.
///
/// # Contract
///
/// - `read_at` returns exactly the bytes last written to that range
/// - `write_at` never grows the store; only `append` and `set_len` do
/// - `append` returns the offset the data landed at, which is the size
///   before the call
/// - after `sync` returns, everything written so far survives a crash
///
/// Implemented by [`super::FileBackend`] and [`super::InMemoryBackend`].
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites `data.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WritePastEnd`] if the write would
    /// extend past the current size, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush`: after it returns, all
    /// previously written data survives process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Resizes the storage to exactly `new_size` bytes.
    ///
    /// Growing fills the new region with zeros; shrinking discards
    /// everything past `new_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize fails.
    fn set_len(&mut self, new_size: u64) -> StorageResult<()>;
}

/// Rejects a read of `len` bytes at `offset` that does not lie inside
/// `size` bytes.
pub(crate) fn check_read(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::ReadPastEnd { offset, len, size }),
    }
}

/// Rejects a positioned write that would grow the storage.
pub(crate) fn check_write(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::WritePastEnd { offset, len, size }),
    }
}
