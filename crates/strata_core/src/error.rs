//! Error types for the storage kernel.

use crate::types::{Oid, PageId, Rid, TransactionId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kernel operations.
///
/// I/O failures are fatal and propagate untouched. Running out of buffer
/// frames is reported as [`CoreError::BufferPoolExhausted`]; page-full
/// conditions on hot paths are signalled through `Option`/`bool` results
/// instead. Everything else is a logical-consistency failure.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every frame is pinned and none can be evicted.
    #[error("buffer pool exhausted: all {pool_size} frames are pinned")]
    BufferPoolExhausted {
        /// Number of frames in the pool.
        pool_size: usize,
    },

    /// A page read or written outside the allocated range.
    #[error("{page_id} is not allocated")]
    PageNotAllocated {
        /// The offending page.
        page_id: PageId,
    },

    /// A page decoded to a different kind than the caller expected.
    #[error("{page_id} has type {actual}, expected {expected}")]
    PageTypeMismatch {
        /// The page that was fetched.
        page_id: PageId,
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind found on the page.
        actual: &'static str,
    },

    /// Page bytes do not form a valid page.
    #[error("page corruption: {message}")]
    PageCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected in a log record.
    #[error("checksum mismatch at log offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record in the log file.
        offset: u64,
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A RID does not resolve to a live tuple.
    #[error("tuple not found at {rid}")]
    TupleNotFound {
        /// The RID that was looked up.
        rid: Rid,
    },

    /// No table or index is registered under an oid.
    #[error("table not found: {oid}")]
    TableNotFound {
        /// The oid that was looked up.
        oid: Oid,
    },

    /// An object with this oid is already registered.
    #[error("{oid} already exists")]
    TableExists {
        /// The duplicated oid.
        oid: Oid,
    },

    /// Tuple values do not conform to the table schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A tuple does not fit on an empty page.
    #[error("tuple of {size} bytes exceeds page capacity of {capacity} bytes")]
    TupleTooLarge {
        /// Serialized size of the tuple.
        size: usize,
        /// Largest tuple an empty page can hold.
        capacity: usize,
    },

    /// Operation attempted on a committed or aborted transaction.
    #[error("{txn_id} is not active")]
    TransactionNotActive {
        /// The finished transaction.
        txn_id: TransactionId,
    },

    /// Database directory is held by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The engine has been closed.
    #[error("storage engine is closed")]
    EngineClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a page corruption error.
    pub fn page_corruption(message: impl Into<String>) -> Self {
        Self::PageCorruption {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that callers may recover from by freeing
    /// resources and retrying.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::BufferPoolExhausted { .. })
    }
}
