//! Log manager: LSN assignment, buffering and durable flushes.

use super::record::LogRecord;
use crate::disk::DiskManager;
use crate::error::CoreResult;
use crate::types::Lsn;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

struct LogState {
    next_lsn: Lsn,
    /// Highest LSN appended so far, buffered or not.
    last_lsn: Lsn,
    /// Highest LSN known to be on disk.
    persistent_lsn: Lsn,
    buffer: Vec<u8>,
}

/// Appends log records in LSN order and writes them to the log file.
///
/// LSNs are assigned under the same lock that appends to the buffer, so
/// buffer order, file order and LSN order agree. Records become durable on
/// [`flush`](Self::flush), or automatically once the buffer exceeds its
/// capacity.
pub struct LogManager {
    disk: Arc<DiskManager>,
    capacity: usize,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Creates a log manager that starts numbering at [`Lsn::FIRST`].
    ///
    /// Call [`bootstrap`](Self::bootstrap) before appending to an existing
    /// log.
    pub fn new(disk: Arc<DiskManager>, buffer_capacity: usize) -> Self {
        Self {
            disk,
            capacity: buffer_capacity,
            state: Mutex::new(LogState {
                next_lsn: Lsn::FIRST,
                last_lsn: Lsn::ZERO,
                persistent_lsn: Lsn::ZERO,
                buffer: Vec::with_capacity(buffer_capacity),
            }),
        }
    }

    /// Prepares for appending after the records already on disk.
    ///
    /// Drops a torn final record, then sets the next LSN one past the
    /// highest LSN found. Returns the records on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read, is corrupt, or cannot be
    /// truncated.
    pub fn bootstrap(&self) -> CoreResult<Vec<LogRecord>> {
        let (records, valid_len) = self.read_with_len()?;
        self.disk.truncate_log(valid_len as u64)?;

        let max = records
            .iter()
            .map(LogRecord::lsn)
            .max()
            .unwrap_or(Lsn::ZERO);
        let mut state = self.state.lock();
        state.next_lsn = max.next();
        state.last_lsn = max;
        state.persistent_lsn = max;
        state.buffer.clear();
        debug!(records = records.len(), next_lsn = %state.next_lsn, "log bootstrapped");
        Ok(records)
    }

    /// Assigns the next LSN to `record`, buffers it and returns the LSN.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded, or if the buffer
    /// reached capacity and the automatic flush failed. A failed append
    /// leaves no trace: the record is dropped from the buffer and its LSN
    /// is handed out again.
    pub fn append(&self, record: &mut LogRecord) -> CoreResult<Lsn> {
        let mut state = self.state.lock();
        let lsn = state.next_lsn;
        record.header.lsn = lsn;
        let bytes = record.encode()?;

        let buffered = state.buffer.len();
        let prev_last = state.last_lsn;
        state.buffer.extend_from_slice(&bytes);
        state.next_lsn = lsn.next();
        state.last_lsn = lsn;
        trace!(%lsn, kind = record.record_type().name(), txn = %record.txn_id(), "log append");

        if state.buffer.len() >= self.capacity {
            if let Err(e) = self.flush_locked(&mut state) {
                warn!(%lsn, error = %e, "log flush failed, record dropped");
                state.buffer.truncate(buffered);
                state.next_lsn = lsn;
                state.last_lsn = prev_last;
                return Err(e);
            }
        }
        Ok(lsn)
    }

    /// Writes every buffered record to the log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the buffer is kept intact.
    pub fn flush(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut LogState) -> CoreResult<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        self.disk.write_log(&state.buffer)?;
        trace!(bytes = state.buffer.len(), lsn = %state.last_lsn, "log flushed");
        state.buffer.clear();
        state.persistent_lsn = state.last_lsn;
        Ok(())
    }

    /// Highest LSN known to be durable.
    #[must_use]
    pub fn persistent_lsn(&self) -> Lsn {
        self.state.lock().persistent_lsn
    }

    /// LSN the next append will receive.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    /// Parses every durable record in file order.
    ///
    /// Buffered records are not included. A torn final record ends the log.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ChecksumMismatch`] or
    /// [`crate::CoreError::LogCorruption`] for damaged complete records.
    pub fn read(&self) -> CoreResult<Vec<LogRecord>> {
        Ok(self.read_with_len()?.0)
    }

    fn read_with_len(&self) -> CoreResult<(Vec<LogRecord>, usize)> {
        let stream = self.disk.read_log()?;
        let mut records = Vec::new();
        let mut offset = 0;
        while let Some((record, len)) = LogRecord::decode(&stream, offset)? {
            records.push(record);
            offset += len;
        }
        if offset < stream.len() {
            warn!(
                offset,
                dropped = stream.len() - offset,
                "log ends in a torn record"
            );
        }
        Ok((records, offset))
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogManager")
            .field("next_lsn", &state.next_lsn)
            .field("persistent_lsn", &state.persistent_lsn)
            .field("buffered", &state.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageId, Rid, TransactionId};
    use crate::wal::LogBody;
    use strata_storage::InMemoryBackend;

    fn insert(txn: i32) -> LogRecord {
        LogRecord::new(
            TransactionId::new(txn),
            Lsn::INVALID,
            LogBody::Insert {
                rid: Rid::new(PageId::new(1), 0),
                tuple: vec![9; 16],
            },
        )
    }

    #[test]
    fn lsns_are_dense_and_ordered() {
        let log = LogManager::new(Arc::new(DiskManager::in_memory()), 1 << 16);
        let lsns: Vec<Lsn> = (0..5).map(|_| log.append(&mut insert(1)).unwrap()).collect();
        assert_eq!(lsns, (1..=5).map(Lsn::new).collect::<Vec<_>>());
        assert_eq!(log.persistent_lsn(), Lsn::ZERO);

        log.flush().unwrap();
        assert_eq!(log.persistent_lsn(), Lsn::new(5));
        let read: Vec<Lsn> = log.read().unwrap().iter().map(LogRecord::lsn).collect();
        assert_eq!(read, lsns);
    }

    #[test]
    fn full_buffer_flushes_itself() {
        let disk = Arc::new(DiskManager::in_memory());
        let log = LogManager::new(Arc::clone(&disk), 64);
        log.append(&mut insert(1)).unwrap();
        log.append(&mut insert(1)).unwrap();
        assert_eq!(log.persistent_lsn(), Lsn::new(2));
        assert_eq!(disk.stats().log_flushes, 1);
    }

    #[test]
    fn retried_flush_writes_each_record_once() {
        let (disk, _wal, faults) = crate::testing::faulty_log_disk();
        let log = LogManager::new(disk, 1 << 16);
        log.append(&mut insert(1)).unwrap();
        log.append(&mut insert(1)).unwrap();

        faults.fail_sync_after(0);
        assert!(log.flush().is_err());
        assert_eq!(log.persistent_lsn(), Lsn::ZERO);

        log.flush().unwrap();
        let read: Vec<Lsn> = log.read().unwrap().iter().map(LogRecord::lsn).collect();
        assert_eq!(read, vec![Lsn::new(1), Lsn::new(2)]);
    }

    #[test]
    fn failed_automatic_flush_drops_the_record() {
        let (disk, wal, faults) = crate::testing::faulty_log_disk();
        let log = LogManager::new(disk, 1);
        assert_eq!(log.append(&mut insert(1)).unwrap(), Lsn::new(1));

        faults.fail_sync_after(0);
        assert!(log.append(&mut insert(1)).is_err());
        assert_eq!(log.next_lsn(), Lsn::new(2));
        assert_eq!(log.persistent_lsn(), Lsn::new(1));
        let durable = wal.data().len();

        assert_eq!(log.append(&mut insert(1)).unwrap(), Lsn::new(2));
        assert_eq!(wal.data().len(), 2 * durable);
        let read: Vec<Lsn> = log.read().unwrap().iter().map(LogRecord::lsn).collect();
        assert_eq!(read, vec![Lsn::new(1), Lsn::new(2)]);
    }

    #[test]
    fn restart_continues_numbering() {
        let data = InMemoryBackend::new();
        let wal = InMemoryBackend::new();
        let disk = || Arc::new(DiskManager::new(Box::new(data.share()), Box::new(wal.share())));

        let log = LogManager::new(disk(), 1 << 16);
        for _ in 0..3 {
            log.append(&mut insert(1)).unwrap();
        }
        log.flush().unwrap();
        // buffered but never flushed: lost in the crash
        log.append(&mut insert(1)).unwrap();
        drop(log);

        let log = LogManager::new(disk(), 1 << 16);
        assert_eq!(log.bootstrap().unwrap().len(), 3);
        assert_eq!(log.append(&mut insert(2)).unwrap(), Lsn::new(4));
    }

    #[test]
    fn torn_tail_is_dropped_on_bootstrap() {
        let data = InMemoryBackend::new();
        let wal = InMemoryBackend::new();
        let disk = Arc::new(DiskManager::new(Box::new(data.share()), Box::new(wal.share())));

        let log = LogManager::new(Arc::clone(&disk), 1 << 16);
        log.append(&mut insert(1)).unwrap();
        log.flush().unwrap();
        let partial = insert(1).encode().unwrap();
        disk.write_log(&partial[..10]).unwrap();

        let log = LogManager::new(Arc::clone(&disk), 1 << 16);
        assert_eq!(log.bootstrap().unwrap().len(), 1);
        log.append(&mut insert(3)).unwrap();
        log.flush().unwrap();
        assert_eq!(log.read().unwrap().len(), 2);
    }
}
