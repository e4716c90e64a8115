//! Database directory management.
//!
//! A persistent engine lives in a directory:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK      # Advisory lock for single-process access
//! ├─ data.db   # Fixed-size pages
//! └─ wal.log   # Write-ahead log
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DATA_FILE: &str = "data.db";
const LOG_FILE: &str = "wal.log";

/// Holds an exclusive lock on a database directory for its lifetime.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens (and optionally creates) a database directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the page file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Path of the log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let root = tempdir().unwrap();
        let path = root.path().join("db");

        let dir = DatabaseDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.data_path(), path.join("data.db"));
        assert_eq!(dir.log_path(), path.join("wal.log"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let root = tempdir().unwrap();
        let result = DatabaseDir::open(&root.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn second_open_is_locked_out() {
        let root = tempdir().unwrap();
        let _first = DatabaseDir::open(root.path(), true).unwrap();
        let second = DatabaseDir::open(root.path(), true);
        assert!(matches!(second, Err(CoreError::DatabaseLocked)));
    }
}
