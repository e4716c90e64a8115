//! Core identifiers and constants.

use std::fmt;

/// Size of every page in bytes, on disk and in the buffer pool.
pub const PAGE_SIZE: usize = 4096;

/// Identifier of a page within the data file.
///
/// Page ids are assigned once by the disk manager and never reused.
/// The on-disk address of a page is `page_id * PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel terminating page chains.
    pub const INVALID: Self = Self(-1);

    /// Creates a new page id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns true unless this is [`PageId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page in the data file.
    #[must_use]
    pub const fn file_offset(self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Index of an in-memory frame in the buffer pool.
pub type FrameId = usize;

/// Log sequence number.
///
/// LSNs are assigned at append time and are strictly increasing. A page
/// stores the LSN of the last logged mutation applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub i32);

impl Lsn {
    /// LSN of a page that has never been mutated under logging.
    pub const ZERO: Self = Self(0);

    /// Placeholder carried by records that have not been appended yet.
    pub const INVALID: Self = Self(-1);

    /// The first LSN handed out by a fresh log.
    pub const FIRST: Self = Self(1);

    /// Creates a new LSN.
    #[must_use]
    pub const fn new(lsn: i32) -> Self {
        Self(lsn)
    }

    /// Returns the raw LSN value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns the following LSN.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Unique identifier for a transaction. Ids start at 1; 0 means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub i32);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Object identifier of a table or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub i32);

impl Oid {
    /// Oid carried by pages that do not belong to any table yet.
    pub const INVALID: Self = Self(-1);

    /// Creates a new oid.
    #[must_use]
    pub const fn new(oid: i32) -> Self {
        Self(oid)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// Row identifier: the stable address of a tuple.
///
/// A RID is assigned when the tuple is inserted and never changes, including
/// across in-place updates and tombstoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    /// Page holding the tuple.
    pub page_id: PageId,
    /// Line-pointer index on that page.
    pub slot: u32,
}

impl Rid {
    /// Creates a new RID.
    #[must_use]
    pub const fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id.0, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_offsets() {
        assert_eq!(PageId::new(0).file_offset(), 0);
        assert_eq!(PageId::new(3).file_offset(), 3 * PAGE_SIZE as u64);
        assert!(!PageId::INVALID.is_valid());
    }

    #[test]
    fn lsn_ordering() {
        assert!(Lsn::ZERO < Lsn::FIRST);
        assert_eq!(Lsn::FIRST.next(), Lsn::new(2));
    }

    #[test]
    fn rid_display() {
        let rid = Rid::new(PageId::new(4), 2);
        assert_eq!(format!("{rid}"), "(4, 2)");
    }
}
