//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod recover;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use strata_core::DiskManager;
use strata_storage::FileBackend;

const DATA_FILE: &str = "data.db";
const LOG_FILE: &str = "wal.log";

/// Opens the page and log files of a database directory without
/// bootstrapping or recovering them.
///
/// Missing files are reported instead of created.
pub(crate) fn open_files(path: &Path) -> Result<Arc<DiskManager>, Box<dyn Error>> {
    if !path.is_dir() {
        return Err(format!("not a database directory: {}", path.display()).into());
    }
    let data_path = path.join(DATA_FILE);
    let log_path = path.join(LOG_FILE);
    for file in [&data_path, &log_path] {
        if !file.is_file() {
            return Err(format!("missing file: {}", file.display()).into());
        }
    }

    let data = FileBackend::open(&data_path)?;
    let log = FileBackend::open(&log_path)?;
    Ok(Arc::new(DiskManager::new(Box::new(data), Box::new(log))))
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sizes() {
        assert_eq!(format_size(10), "10 B");
        assert_eq!(format_size(4096), "4.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_files_are_not_created() {
        let dir = tempdir().unwrap();
        let err = open_files(dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing file"));
        assert!(!dir.path().join(DATA_FILE).exists());
    }

    #[test]
    fn plain_file_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x");
        std::fs::write(&file, b"x").unwrap();
        assert!(open_files(&file).is_err());
    }
}
