//! Page formats.
//!
//! Every page kind owns its exact byte layout and a serialize/deserialize
//! pair. All layouts share a common prefix:
//!
//! ```text
//! | page_id (4) | page_type (4) | kind-specific fields ... |
//! ```
//!
//! Integers are little-endian. A page whose bytes are all zero was allocated
//! by the disk manager but never written; it decodes to a fresh page of
//! whatever kind the caller expects.
//!
//! ## Page Kinds
//!
//! - [`HeaderPage`]: `oid -> first page id` directory
//! - [`TablePage`]: slotted tuple storage
//! - [`BTreeInternalPage`]: `key range -> child page id`
//! - [`BTreeLeafPage`]: `key -> RID`, chained for range scans

mod btree_internal;
mod btree_leaf;
mod codec;
mod header;
mod table;

pub use btree_internal::{BTreeInternalPage, INTERNAL_PAGE_CAPACITY};
pub use btree_leaf::{BTreeLeafPage, LEAF_PAGE_CAPACITY};
pub use header::{HeaderPage, HEADER_PAGE_CAPACITY};
pub use table::{SlotState, TablePage, TABLE_PAGE_HEADER_SIZE, LINE_POINTER_SIZE};

use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, PageId, PAGE_SIZE};

/// On-disk type tag of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PageKind {
    /// Directory page.
    Header = 1,
    /// Slotted table page.
    Table = 2,
    /// B+tree internal node.
    BTreeInternal = 3,
    /// B+tree leaf node.
    BTreeLeaf = 4,
}

impl PageKind {
    /// Converts an on-disk tag to a page kind.
    #[must_use]
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            1 => Some(Self::Header),
            2 => Some(Self::Table),
            3 => Some(Self::BTreeInternal),
            4 => Some(Self::BTreeLeaf),
            _ => None,
        }
    }

    /// Returns the on-disk tag.
    #[must_use]
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Human-readable name, used in errors and tooling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Table => "table",
            Self::BTreeInternal => "btree-internal",
            Self::BTreeLeaf => "btree-leaf",
        }
    }

    fn blank(self, page_id: PageId) -> Page {
        match self {
            Self::Header => Page::Header(HeaderPage::new(page_id)),
            Self::Table => Page::Table(TablePage::new(page_id, crate::types::Oid::INVALID)),
            Self::BTreeInternal => {
                Page::BTreeInternal(BTreeInternalPage::new(page_id, PageId::INVALID))
            }
            Self::BTreeLeaf => Page::BTreeLeaf(BTreeLeafPage::new(page_id, PageId::INVALID)),
        }
    }
}

/// A decoded page held by the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Directory page.
    Header(HeaderPage),
    /// Slotted table page.
    Table(TablePage),
    /// B+tree internal node.
    BTreeInternal(BTreeInternalPage),
    /// B+tree leaf node.
    BTreeLeaf(BTreeLeafPage),
}

macro_rules! page_accessors {
    ($as_ref:ident, $as_mut:ident, $variant:ident, $ty:ty, $kind:expr) => {
        /// Borrows the page as this kind, failing on any other kind.
        ///
        /// # Errors
        ///
        /// Returns [`CoreError::PageTypeMismatch`] for other page kinds.
        pub fn $as_ref(&self) -> CoreResult<&$ty> {
            match self {
                Self::$variant(page) => Ok(page),
                other => Err(other.mismatch($kind)),
            }
        }

        /// Mutably borrows the page as this kind, failing on any other kind.
        ///
        /// # Errors
        ///
        /// Returns [`CoreError::PageTypeMismatch`] for other page kinds.
        pub fn $as_mut(&mut self) -> CoreResult<&mut $ty> {
            match self {
                Self::$variant(page) => Ok(page),
                other => Err(other.mismatch($kind)),
            }
        }
    };
}

impl Page {
    /// Returns the page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        match self {
            Self::Header(p) => p.page_id(),
            Self::Table(p) => p.page_id(),
            Self::BTreeInternal(p) => p.page_id(),
            Self::BTreeLeaf(p) => p.page_id(),
        }
    }

    /// Returns the page kind.
    #[must_use]
    pub fn kind(&self) -> PageKind {
        match self {
            Self::Header(_) => PageKind::Header,
            Self::Table(_) => PageKind::Table,
            Self::BTreeInternal(_) => PageKind::BTreeInternal,
            Self::BTreeLeaf(_) => PageKind::BTreeLeaf,
        }
    }

    /// LSN of the last logged mutation. Only table pages are logged; other
    /// kinds report [`Lsn::ZERO`].
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        match self {
            Self::Table(p) => p.lsn(),
            _ => Lsn::ZERO,
        }
    }

    /// Encodes the page into exactly [`PAGE_SIZE`] bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Header(p) => p.serialize(),
            Self::Table(p) => p.serialize(),
            Self::BTreeInternal(p) => p.serialize(),
            Self::BTreeLeaf(p) => p.serialize(),
        }
    }

    /// Decodes a page image read from `page_id`.
    ///
    /// Dispatches on the stored type tag. When `expected` is given the tag
    /// must match it, and an all-zero image decodes to a blank page of that
    /// kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageTypeMismatch`] when the tag differs from
    /// `expected`, or [`CoreError::PageCorruption`] for malformed images.
    pub fn deserialize(
        page_id: PageId,
        bytes: &[u8],
        expected: Option<PageKind>,
    ) -> CoreResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(CoreError::page_corruption(format!(
                "{page_id} image is {} bytes",
                bytes.len()
            )));
        }

        if bytes.iter().all(|&b| b == 0) {
            return match expected {
                Some(kind) => Ok(kind.blank(page_id)),
                None => Err(CoreError::page_corruption(format!(
                    "{page_id} was allocated but never written"
                ))),
            };
        }

        let stored_id = PageId::new(codec::read_i32(bytes, 0));
        if stored_id != page_id {
            return Err(CoreError::page_corruption(format!(
                "{page_id} holds the image of {stored_id}"
            )));
        }

        let tag = codec::read_i32(bytes, 4);
        let kind = PageKind::from_tag(tag)
            .ok_or_else(|| CoreError::page_corruption(format!("{page_id} has unknown type {tag}")))?;

        if let Some(expected) = expected {
            if expected != kind {
                return Err(CoreError::PageTypeMismatch {
                    page_id,
                    expected: expected.name(),
                    actual: kind.name(),
                });
            }
        }

        Ok(match kind {
            PageKind::Header => Self::Header(HeaderPage::deserialize(bytes)?),
            PageKind::Table => Self::Table(TablePage::deserialize(bytes)?),
            PageKind::BTreeInternal => Self::BTreeInternal(BTreeInternalPage::deserialize(bytes)?),
            PageKind::BTreeLeaf => Self::BTreeLeaf(BTreeLeafPage::deserialize(bytes)?),
        })
    }

    page_accessors!(as_header, as_header_mut, Header, HeaderPage, PageKind::Header);
    page_accessors!(as_table, as_table_mut, Table, TablePage, PageKind::Table);
    page_accessors!(
        as_internal,
        as_internal_mut,
        BTreeInternal,
        BTreeInternalPage,
        PageKind::BTreeInternal
    );
    page_accessors!(as_leaf, as_leaf_mut, BTreeLeaf, BTreeLeafPage, PageKind::BTreeLeaf);

    fn mismatch(&self, expected: PageKind) -> CoreError {
        CoreError::PageTypeMismatch {
            page_id: self.page_id(),
            expected: expected.name(),
            actual: self.kind().name(),
        }
    }
}
