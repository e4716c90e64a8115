//! Write-ahead log.
//!
//! Every page mutation is described by a log record whose LSN is stamped on
//! the page. The log file is a plain concatenation of records:
//!
//! ```text
//! | size (4) | lsn (4) | prev_lsn (4) | txn_id (4) | type (4) | payload (N) | crc32 (4) |
//! ```
//!
//! `size` counts the whole record, so a reader can split the stream without
//! knowing the record types.
//!
//! ## Recovery policy
//!
//! - A record cut short by the end of the file is a torn write from a crash.
//!   It ends the log cleanly and is truncated away on bootstrap.
//! - A complete record with a bad checksum, an impossible size or an unknown
//!   type is fatal. Nothing after it can be trusted, so the engine refuses
//!   to open.
//!
//! ## Write-ahead rule
//!
//! The buffer pool never writes a page whose LSN is above
//! [`LogManager::persistent_lsn`]; it flushes the log first.

mod manager;
mod record;

pub use manager::LogManager;
pub use record::{LogBody, LogHeader, LogRecord, LogRecordType, LOG_CRC_SIZE, LOG_HEADER_SIZE};
