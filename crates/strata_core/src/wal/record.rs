//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, Oid, PageId, Rid, TransactionId};

/// Size of the fixed record header: size, lsn, prev_lsn, txn_id, type.
pub const LOG_HEADER_SIZE: usize = 20;

/// Size of the trailing checksum.
pub const LOG_CRC_SIZE: usize = 4;

/// Type tag of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    /// Transaction started.
    Begin = 1,
    /// Transaction committed.
    Commit = 2,
    /// Transaction rolled back.
    Abort = 3,
    /// Tuple inserted.
    Insert = 4,
    /// Tuple overwritten in place.
    Update = 5,
    /// Tuple tombstoned.
    MarkDelete = 6,
    /// Tombstone cleared.
    RollbackDelete = 7,
    /// Tuple removed for good.
    ApplyDelete = 8,
    /// Table page created and linked.
    NewPage = 9,
}

impl LogRecordType {
    /// Converts a stored tag to a record type.
    #[must_use]
    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            1 => Self::Begin,
            2 => Self::Commit,
            3 => Self::Abort,
            4 => Self::Insert,
            5 => Self::Update,
            6 => Self::MarkDelete,
            7 => Self::RollbackDelete,
            8 => Self::ApplyDelete,
            9 => Self::NewPage,
            _ => return None,
        })
    }

    /// The stored tag.
    #[must_use]
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Upper-case name used in log dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::MarkDelete => "MARK_DELETE",
            Self::RollbackDelete => "ROLLBACK_DELETE",
            Self::ApplyDelete => "APPLY_DELETE",
            Self::NewPage => "NEW_PAGE",
        }
    }
}

/// Fields shared by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Assigned by the log manager on append.
    pub lsn: Lsn,
    /// Previous record of the same transaction.
    pub prev_lsn: Lsn,
    /// Owning transaction.
    pub txn_id: TransactionId,
}

/// Type-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBody {
    /// Transaction started.
    Begin,
    /// Transaction committed.
    Commit,
    /// Transaction rolled back.
    Abort,
    /// Tuple inserted at `rid`.
    Insert {
        /// Where the tuple was stored.
        rid: Rid,
        /// Serialized tuple.
        tuple: Vec<u8>,
    },
    /// Tuple at `rid` replaced.
    Update {
        /// Updated tuple.
        rid: Rid,
        /// Image before the update.
        old: Vec<u8>,
        /// Image after the update.
        new: Vec<u8>,
    },
    /// Tuple at `rid` tombstoned.
    MarkDelete {
        /// Tombstoned tuple.
        rid: Rid,
        /// Its image.
        tuple: Vec<u8>,
    },
    /// Tombstone at `rid` cleared.
    RollbackDelete {
        /// Restored tuple.
        rid: Rid,
        /// Its image.
        tuple: Vec<u8>,
    },
    /// Tuple at `rid` removed for good.
    ApplyDelete {
        /// Removed tuple.
        rid: Rid,
        /// Image needed to reinsert it on undo.
        tuple: Vec<u8>,
    },
    /// Table page `page_id` created for `oid`, linked after `prev_page_id`
    /// (`PageId::INVALID` for the first page of a table).
    NewPage {
        /// Predecessor in the table chain.
        prev_page_id: PageId,
        /// The new page.
        page_id: PageId,
        /// Owning table.
        oid: Oid,
    },
}

impl LogBody {
    /// Tuple addressed by a data record.
    #[must_use]
    pub fn rid(&self) -> Option<Rid> {
        match self {
            Self::Insert { rid, .. }
            | Self::Update { rid, .. }
            | Self::MarkDelete { rid, .. }
            | Self::RollbackDelete { rid, .. }
            | Self::ApplyDelete { rid, .. } => Some(*rid),
            Self::Begin | Self::Commit | Self::Abort | Self::NewPage { .. } => None,
        }
    }
}

/// A log record: a common header plus a typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Shared fields.
    pub header: LogHeader,
    /// Type-specific payload.
    pub body: LogBody,
}

impl LogRecord {
    /// Builds a record whose LSN is assigned later by the log manager.
    #[must_use]
    pub fn new(txn_id: TransactionId, prev_lsn: Lsn, body: LogBody) -> Self {
        Self {
            header: LogHeader {
                lsn: Lsn::INVALID,
                prev_lsn,
                txn_id,
            },
            body,
        }
    }

    /// The record's LSN.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// The owning transaction.
    #[must_use]
    pub fn txn_id(&self) -> TransactionId {
        self.header.txn_id
    }

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match &self.body {
            LogBody::Begin => LogRecordType::Begin,
            LogBody::Commit => LogRecordType::Commit,
            LogBody::Abort => LogRecordType::Abort,
            LogBody::Insert { .. } => LogRecordType::Insert,
            LogBody::Update { .. } => LogRecordType::Update,
            LogBody::MarkDelete { .. } => LogRecordType::MarkDelete,
            LogBody::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            LogBody::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            LogBody::NewPage { .. } => LogRecordType::NewPage,
        }
    }

    /// Page touched by this record, if it describes a page change.
    #[must_use]
    pub fn page_id(&self) -> Option<PageId> {
        match &self.body {
            LogBody::NewPage { page_id, .. } => Some(*page_id),
            body => body.rid().map(|rid| rid.page_id),
        }
    }

    /// Encodes the record, checksum included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the record would not fit
    /// the 32-bit size field.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(LOG_HEADER_SIZE + self.payload_hint() + LOG_CRC_SIZE);
        // size is patched in below
        buf.extend_from_slice(&0i32.to_le_bytes());
        put_i32(&mut buf, self.header.lsn.as_i32());
        put_i32(&mut buf, self.header.prev_lsn.as_i32());
        put_i32(&mut buf, self.header.txn_id.as_i32());
        put_i32(&mut buf, self.record_type().tag());

        match &self.body {
            LogBody::Begin | LogBody::Commit | LogBody::Abort => {}
            LogBody::Insert { rid, tuple }
            | LogBody::MarkDelete { rid, tuple }
            | LogBody::RollbackDelete { rid, tuple }
            | LogBody::ApplyDelete { rid, tuple } => {
                put_rid(&mut buf, *rid);
                put_blob(&mut buf, tuple)?;
            }
            LogBody::Update { rid, old, new } => {
                put_rid(&mut buf, *rid);
                put_blob(&mut buf, old)?;
                put_blob(&mut buf, new)?;
            }
            LogBody::NewPage {
                prev_page_id,
                page_id,
                oid,
            } => {
                put_i32(&mut buf, prev_page_id.as_i32());
                put_i32(&mut buf, page_id.as_i32());
                put_i32(&mut buf, oid.as_i32());
            }
        }

        let size = i32::try_from(buf.len() + LOG_CRC_SIZE)
            .map_err(|_| CoreError::invalid_operation("log record too large"))?;
        buf[..4].copy_from_slice(&size.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes the record starting at `offset` in a log stream.
    ///
    /// Returns `Ok(None)` when the stream ends inside the record, which is
    /// how a torn final write looks. Otherwise returns the record and its
    /// encoded length.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] if the stored checksum does
    /// not match, and [`CoreError::LogCorruption`] for an impossible size,
    /// an unknown type, or a malformed payload.
    pub fn decode(stream: &[u8], offset: usize) -> CoreResult<Option<(Self, usize)>> {
        let rest = &stream[offset.min(stream.len())..];
        if rest.len() < 4 {
            return Ok(None);
        }
        let size = read_i32(rest, 0);
        let size = usize::try_from(size)
            .ok()
            .filter(|&s| s >= LOG_HEADER_SIZE + LOG_CRC_SIZE)
            .ok_or_else(|| {
                CoreError::log_corruption(format!("record at offset {offset} has size {size}"))
            })?;
        if rest.len() < size {
            return Ok(None);
        }

        let record = &rest[..size];
        let body_end = size - LOG_CRC_SIZE;
        let expected = u32::from_le_bytes([
            record[body_end],
            record[body_end + 1],
            record[body_end + 2],
            record[body_end + 3],
        ]);
        let actual = crc32fast::hash(&record[..body_end]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset: offset as u64,
                expected,
                actual,
            });
        }

        let tag = read_i32(record, 16);
        let record_type = LogRecordType::from_tag(tag).ok_or_else(|| {
            CoreError::log_corruption(format!("record at offset {offset} has unknown type {tag}"))
        })?;
        let header = LogHeader {
            lsn: Lsn::new(read_i32(record, 4)),
            prev_lsn: Lsn::new(read_i32(record, 8)),
            txn_id: TransactionId::new(read_i32(record, 12)),
        };

        let mut payload = Reader {
            buf: &record[LOG_HEADER_SIZE..body_end],
            pos: 0,
            offset,
        };
        let body = match record_type {
            LogRecordType::Begin => LogBody::Begin,
            LogRecordType::Commit => LogBody::Commit,
            LogRecordType::Abort => LogBody::Abort,
            LogRecordType::Insert => LogBody::Insert {
                rid: payload.rid()?,
                tuple: payload.blob()?,
            },
            LogRecordType::Update => LogBody::Update {
                rid: payload.rid()?,
                old: payload.blob()?,
                new: payload.blob()?,
            },
            LogRecordType::MarkDelete => LogBody::MarkDelete {
                rid: payload.rid()?,
                tuple: payload.blob()?,
            },
            LogRecordType::RollbackDelete => LogBody::RollbackDelete {
                rid: payload.rid()?,
                tuple: payload.blob()?,
            },
            LogRecordType::ApplyDelete => LogBody::ApplyDelete {
                rid: payload.rid()?,
                tuple: payload.blob()?,
            },
            LogRecordType::NewPage => LogBody::NewPage {
                prev_page_id: PageId::new(payload.i32()?),
                page_id: PageId::new(payload.i32()?),
                oid: Oid::new(payload.i32()?),
            },
        };
        payload.finish(record_type)?;

        Ok(Some((Self { header, body }, size)))
    }

    fn payload_hint(&self) -> usize {
        match &self.body {
            LogBody::Insert { tuple, .. }
            | LogBody::MarkDelete { tuple, .. }
            | LogBody::RollbackDelete { tuple, .. }
            | LogBody::ApplyDelete { tuple, .. } => 12 + tuple.len(),
            LogBody::Update { old, new, .. } => 16 + old.len() + new.len(),
            LogBody::NewPage { .. } => 12,
            LogBody::Begin | LogBody::Commit | LogBody::Abort => 0,
        }
    }
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_rid(buf: &mut Vec<u8>, rid: Rid) {
    put_i32(buf, rid.page_id.as_i32());
    buf.extend_from_slice(&rid.slot.to_le_bytes());
}

fn put_blob(buf: &mut Vec<u8>, blob: &[u8]) -> CoreResult<()> {
    let len = i32::try_from(blob.len())
        .map_err(|_| CoreError::invalid_operation("tuple image too large for the log"))?;
    put_i32(buf, len);
    buf.extend_from_slice(blob);
    Ok(())
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    offset: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> CoreResult<&[u8]> {
        if self.buf.len() - self.pos < len {
            return Err(CoreError::log_corruption(format!(
                "record at offset {} ends inside its payload",
                self.offset
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn i32(&mut self) -> CoreResult<i32> {
        let bytes = self.take(4)?;
        Ok(read_i32(bytes, 0))
    }

    fn rid(&mut self) -> CoreResult<Rid> {
        let page_id = PageId::new(self.i32()?);
        let bytes = self.take(4)?;
        let slot = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Rid::new(page_id, slot))
    }

    fn blob(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.i32()?;
        let len = usize::try_from(len).map_err(|_| {
            CoreError::log_corruption(format!(
                "record at offset {} has blob length {len}",
                self.offset
            ))
        })?;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&self, record_type: LogRecordType) -> CoreResult<()> {
        if self.pos != self.buf.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {} record at offset {}: expected {}, got {}",
                record_type.name(),
                self.offset,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> Rid {
        Rid::new(PageId::new(3), 7)
    }

    fn stamped(mut record: LogRecord, lsn: i32) -> LogRecord {
        record.header.lsn = Lsn::new(lsn);
        record
    }

    fn every_kind() -> Vec<LogRecord> {
        let txn = TransactionId::new(5);
        let prev = Lsn::new(1);
        vec![
            LogRecord::new(txn, Lsn::INVALID, LogBody::Begin),
            LogRecord::new(txn, prev, LogBody::Insert { rid: rid(), tuple: b"row".to_vec() }),
            LogRecord::new(
                txn,
                prev,
                LogBody::Update { rid: rid(), old: b"a".to_vec(), new: b"bb".to_vec() },
            ),
            LogRecord::new(txn, prev, LogBody::MarkDelete { rid: rid(), tuple: b"x".to_vec() }),
            LogRecord::new(txn, prev, LogBody::RollbackDelete { rid: rid(), tuple: b"x".to_vec() }),
            LogRecord::new(txn, prev, LogBody::ApplyDelete { rid: rid(), tuple: b"x".to_vec() }),
            LogRecord::new(
                txn,
                prev,
                LogBody::NewPage {
                    prev_page_id: PageId::INVALID,
                    page_id: PageId::new(4),
                    oid: Oid::new(2),
                },
            ),
            LogRecord::new(txn, prev, LogBody::Commit),
            LogRecord::new(txn, prev, LogBody::Abort),
        ]
    }

    #[test]
    fn every_kind_roundtrips_through_a_stream() {
        let records: Vec<_> = every_kind()
            .into_iter()
            .enumerate()
            .map(|(i, r)| stamped(r, i as i32 + 1))
            .collect();
        let mut stream = Vec::new();
        for record in &records {
            stream.extend(record.encode().unwrap());
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while let Some((record, len)) = LogRecord::decode(&stream, offset).unwrap() {
            decoded.push(record);
            offset += len;
        }
        assert_eq!(decoded, records);
    }

    #[test]
    fn size_prefix_counts_whole_record() {
        let record = stamped(every_kind().swap_remove(1), 2);
        let bytes = record.encode().unwrap();
        assert_eq!(read_i32(&bytes, 0) as usize, bytes.len());
        assert_eq!(bytes.len(), LOG_HEADER_SIZE + 8 + 4 + 3 + LOG_CRC_SIZE);
    }

    #[test]
    fn torn_tail_is_end_of_log() {
        let bytes = stamped(every_kind().swap_remove(1), 2).encode().unwrap();
        for cut in 0..bytes.len() {
            assert!(LogRecord::decode(&bytes[..cut], 0).unwrap().is_none());
        }
    }

    #[test]
    fn flipped_bit_is_checksum_mismatch() {
        let mut bytes = stamped(every_kind().swap_remove(1), 2).encode().unwrap();
        bytes[LOG_HEADER_SIZE + 9] ^= 0x01;
        assert!(matches!(
            LogRecord::decode(&bytes, 0),
            Err(CoreError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut bytes = stamped(LogRecord::new(TransactionId::new(1), Lsn::INVALID, LogBody::Begin), 1)
            .encode()
            .unwrap();
        bytes[16..20].copy_from_slice(&42i32.to_le_bytes());
        let crc = crc32fast::hash(&bytes[..bytes.len() - 4]);
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            LogRecord::decode(&bytes, 0),
            Err(CoreError::LogCorruption { .. })
        ));
    }
}
