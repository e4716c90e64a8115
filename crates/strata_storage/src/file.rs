//! File-based storage backend for persistent storage.

use crate::backend::{check_read, check_write, StorageBackend};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A backend over one OS file.
///
/// The page file and the log file of a database are each a `FileBackend`.
/// The file handle and the cached length sit behind a single mutex, so a
/// seek and the read or write that follows it cannot interleave with
/// another caller.
///
/// # Durability
///
/// Writes reach the OS immediately; [`sync`](StorageBackend::sync) issues
/// `fdatasync`, which also persists a length change.
///
/// # Example
///
/// ```no_run
/// use strata_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut pages = FileBackend::open(Path::new("data.db")).unwrap();
/// pages.set_len(4096).unwrap();
/// pages.write_at(0, &[7u8; 16]).unwrap();
/// pages.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<OpenFile>,
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
}

impl OpenFile {
    fn seek_to(&mut self, offset: u64) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

impl FileBackend {
    /// Opens `path`, creating an empty file if none exists. Existing
    /// contents are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(OpenFile { file, len }),
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        check_read(offset, len, inner.len)?;

        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.seek_to(offset)?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        check_write(offset, data.len(), inner.len)?;

        inner.seek_to(offset)?;
        inner.file.write_all(data)?;
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.len;
        if data.is_empty() {
            return Ok(offset);
        }

        inner.seek_to(offset)?;
        inner.file.write_all(data)?;
        inner.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_data()?;
        Ok(())
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        inner.file.set_len(new_size)?;
        inner.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    #[test]
    fn opening_creates_an_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn pages_are_overwritten_in_place() {
        let dir = tempdir().unwrap();
        let mut pages = FileBackend::open(&dir.path().join("data.db")).unwrap();

        pages.set_len(2 * PAGE as u64).unwrap();
        assert_eq!(pages.read_at(PAGE as u64, PAGE).unwrap(), vec![0u8; PAGE]);

        pages.write_at(PAGE as u64, &[0xab; PAGE]).unwrap();
        pages.write_at(PAGE as u64, &[0xcd; 8]).unwrap();

        let page = pages.read_at(PAGE as u64, PAGE).unwrap();
        assert_eq!(&page[..8], &[0xcd; 8]);
        assert_eq!(&page[8..], &[0xab; PAGE - 8][..]);
        assert_eq!(pages.size().unwrap(), 2 * PAGE as u64);
    }

    #[test]
    fn log_appends_return_their_offsets() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("wal.log")).unwrap();

        assert_eq!(log.append(b"first").unwrap(), 0);
        assert_eq!(log.append(b"").unwrap(), 5);
        assert_eq!(log.append(b"second").unwrap(), 5);
        assert_eq!(log.read_at(0, 11).unwrap(), b"firstsecond");
    }

    #[test]
    fn out_of_range_access_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("data.db")).unwrap();
        backend.set_len(4).unwrap();

        assert!(matches!(
            backend.write_at(2, b"toolong"),
            Err(StorageError::WritePastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 2),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(4, 0).unwrap().is_empty());
    }

    #[test]
    fn truncation_drops_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"complete|torn").unwrap();
            log.set_len(8).unwrap();
            log.sync().unwrap();
        }

        let mut log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 8);
        assert_eq!(log.append(b"|next").unwrap(), 8);
        assert_eq!(log.read_at(0, 13).unwrap(), b"complete|next");
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("db").join("data.db");

        {
            let mut backend = FileBackend::open_with_create_dirs(&path).unwrap();
            backend.set_len(PAGE as u64).unwrap();
            backend.write_at(100, b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.path(), path);
        assert_eq!(backend.size().unwrap(), PAGE as u64);
        assert_eq!(backend.read_at(100, 10).unwrap(), b"persistent");
    }
}
