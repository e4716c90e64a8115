//! Slotted table page.
//!
//! ```text
//! | page_id (4) | page_type (4) | oid (4) | lsn (4) | next_page_id (4) |
//! | lower (2) | upper (2) | line pointers ->   free   <- tuple bytes |
//! ```
//!
//! Line pointers are `[offset (2), size (2)]` and grow forward from the
//! header; tuple payloads grow backward from the end of the page. The top
//! bit of `size` is the tombstone flag. A line pointer with `size == 0` is
//! a GONE slot: its tuple was removed for good. Slot ids are never reused,
//! so a RID can never come to name a different tuple.
//!
//! A shrinking update keeps the bytes it no longer needs as slack right
//! after its tuple. The slack belongs to the slot: a later growth uses it
//! first, so putting back the old image never needs space another
//! transaction may have taken. Removing the slot reclaims it.
//!
//! Invariant: `lower <= upper`, and free space is `upper - lower`.

use super::codec::{read_i32, read_u16, write_i32, write_u16};
use super::PageKind;
use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, Oid, PageId, PAGE_SIZE};

/// Size of the fixed table page header.
pub const TABLE_PAGE_HEADER_SIZE: usize = 24;

/// Size of one line pointer.
pub const LINE_POINTER_SIZE: usize = 4;

const TOMBSTONE_FLAG: u16 = 0x8000;
const SIZE_MASK: u16 = 0x7FFF;

const OFFSET_OID: usize = 8;
const OFFSET_LSN: usize = 12;
const OFFSET_NEXT: usize = 16;
const OFFSET_LOWER: usize = 20;
const OFFSET_UPPER: usize = 22;

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Visible tuple.
    Live,
    /// Logically deleted, still occupying space; can be restored.
    Tombstoned,
    /// Removed for good.
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinePointer {
    offset: u16,
    size: u16,
    tombstone: bool,
}

impl LinePointer {
    const GONE: Self = Self {
        offset: 0,
        size: 0,
        tombstone: false,
    };

    fn state(self) -> SlotState {
        if self.size == 0 {
            SlotState::Gone
        } else if self.tombstone {
            SlotState::Tombstoned
        } else {
            SlotState::Live
        }
    }

    fn range(self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.size as usize
    }

    fn encode(self) -> (u16, u16) {
        let size = if self.tombstone {
            self.size | TOMBSTONE_FLAG
        } else {
            self.size
        };
        (self.offset, size)
    }

    fn decode(offset: u16, raw_size: u16) -> Self {
        Self {
            offset,
            size: raw_size & SIZE_MASK,
            tombstone: raw_size & TOMBSTONE_FLAG != 0,
        }
    }
}

/// A slotted page holding tuple images of one table.
///
/// Tuples are stored as raw bytes; the table heap decodes them with the
/// table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePage {
    page_id: PageId,
    oid: Oid,
    lsn: Lsn,
    next_page_id: PageId,
    upper: u16,
    slots: Vec<LinePointer>,
    data: Vec<u8>,
}

impl TablePage {
    /// Largest tuple an empty page can hold.
    pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - TABLE_PAGE_HEADER_SIZE - LINE_POINTER_SIZE;

    /// Creates an empty page owned by `oid`.
    #[must_use]
    pub fn new(page_id: PageId, oid: Oid) -> Self {
        Self {
            page_id,
            oid,
            lsn: Lsn::ZERO,
            next_page_id: PageId::INVALID,
            upper: PAGE_SIZE as u16,
            slots: Vec::new(),
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// Returns the page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the owning table.
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Sets the owning table.
    pub fn set_oid(&mut self, oid: Oid) {
        self.oid = oid;
    }

    /// LSN of the last logged mutation.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Stamps the page with the LSN of the mutation just applied.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    /// Next page in the table chain.
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Links the next page in the table chain.
    pub fn set_next_page_id(&mut self, next: PageId) {
        self.next_page_id = next;
    }

    /// End of the line-pointer array.
    #[must_use]
    pub fn lower_offset(&self) -> u16 {
        (TABLE_PAGE_HEADER_SIZE + self.slots.len() * LINE_POINTER_SIZE) as u16
    }

    /// Start of the tuple area.
    #[must_use]
    pub fn upper_offset(&self) -> u16 {
        self.upper
    }

    /// Bytes between the line pointers and the tuple area.
    #[must_use]
    pub fn free_space(&self) -> usize {
        (self.upper - self.lower_offset()) as usize
    }

    /// Number of line pointers, including tombstoned and GONE slots.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Returns the state of a slot, or `None` past the last line pointer.
    #[must_use]
    pub fn slot_state(&self, slot: u32) -> Option<SlotState> {
        self.slots.get(slot as usize).map(|lp| lp.state())
    }

    /// Returns true if a tuple of `len` bytes fits along with a new line pointer.
    #[must_use]
    pub fn has_room_for(&self, len: usize) -> bool {
        self.free_space() >= len + LINE_POINTER_SIZE
    }

    /// Stores a tuple in a new slot.
    ///
    /// Returns `None` without touching the page when the remaining free
    /// space cannot hold the tuple plus its line pointer.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Option<u32> {
        if tuple.is_empty() || !self.has_room_for(tuple.len()) {
            return None;
        }
        let slot = self.slots.len() as u32;
        let offset = self.place(tuple);
        self.slots.push(LinePointer {
            offset,
            size: tuple.len() as u16,
            tombstone: false,
        });
        Some(slot)
    }

    /// Stores a tuple in a specific slot.
    ///
    /// Used by redo of inserts and undo of permanent deletes: the slot must
    /// be either the next unused slot id or a GONE slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorruption`] if the slot is occupied, lies
    /// beyond the next unused id, or the page has no room.
    pub fn insert_tuple_at(&mut self, slot: u32, tuple: &[u8]) -> CoreResult<()> {
        let index = slot as usize;
        let needed = if index == self.slots.len() {
            tuple.len() + LINE_POINTER_SIZE
        } else {
            tuple.len()
        };

        if tuple.is_empty() || self.free_space() < needed {
            return Err(CoreError::page_corruption(format!(
                "no room to restore slot {slot} on {}",
                self.page_id
            )));
        }

        match self.slots.get(index).map(|lp| lp.state()) {
            None if index == self.slots.len() => {
                let offset = self.place(tuple);
                self.slots.push(LinePointer {
                    offset,
                    size: tuple.len() as u16,
                    tombstone: false,
                });
            }
            Some(SlotState::Gone) => {
                let offset = self.place(tuple);
                self.slots[index] = LinePointer {
                    offset,
                    size: tuple.len() as u16,
                    tombstone: false,
                };
            }
            _ => {
                return Err(CoreError::page_corruption(format!(
                    "cannot restore slot {slot} on {}: slot is in use or out of sequence",
                    self.page_id
                )));
            }
        }
        Ok(())
    }

    /// Returns a visible tuple.
    #[must_use]
    pub fn tuple(&self, slot: u32) -> Option<&[u8]> {
        let lp = *self.slots.get(slot as usize)?;
        (lp.state() == SlotState::Live).then(|| &self.data[lp.range()])
    }

    /// Returns the stored image of a live or tombstoned tuple.
    #[must_use]
    pub fn raw_tuple(&self, slot: u32) -> Option<&[u8]> {
        let lp = *self.slots.get(slot as usize)?;
        (lp.state() != SlotState::Gone).then(|| &self.data[lp.range()])
    }

    /// Iterates over visible tuples in slot order.
    pub fn live_tuples(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, lp)| lp.state() == SlotState::Live)
            .map(|(slot, lp)| (slot as u32, &self.data[lp.range()]))
    }

    /// Tombstones a live tuple. Returns false if the slot was not live.
    pub fn mark_delete(&mut self, slot: u32) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(lp) if lp.state() == SlotState::Live => {
                lp.tombstone = true;
                true
            }
            _ => false,
        }
    }

    /// Clears a tombstone. Returns false if the slot was not tombstoned.
    pub fn rollback_delete(&mut self, slot: u32) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(lp) if lp.state() == SlotState::Tombstoned => {
                lp.tombstone = false;
                true
            }
            _ => false,
        }
    }

    /// Removes a tuple for good and reclaims its bytes.
    ///
    /// Accepts live tuples (rolling back an insert) and tombstoned ones
    /// (committing a delete). Returns the removed image, or `None` if the
    /// slot was already GONE or never existed.
    pub fn apply_delete(&mut self, slot: u32) -> Option<Vec<u8>> {
        let lp = *self.slots.get(slot as usize)?;
        if lp.state() == SlotState::Gone {
            return None;
        }
        let image = self.data[lp.range()].to_vec();
        let reclaimed = lp.size as usize + self.slack_after(lp);
        self.shift_tuples_below(lp.offset, reclaimed as isize);
        self.slots[slot as usize] = LinePointer::GONE;
        Some(image)
    }

    /// Overwrites a live tuple in place, keeping its slot id.
    ///
    /// A smaller image leaves the difference as slack owned by the slot; a
    /// larger one uses that slack before taking free space.
    ///
    /// Returns `Ok(Some(old_image))` on success and `Ok(None)` when the
    /// page lacks room for the larger image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TupleNotFound`] if the slot is not live.
    pub fn update_tuple(&mut self, slot: u32, tuple: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let lp = match self.slots.get(slot as usize) {
            Some(lp) if lp.state() == SlotState::Live => *lp,
            _ => {
                return Err(CoreError::TupleNotFound {
                    rid: crate::types::Rid::new(self.page_id, slot),
                })
            }
        };
        if tuple.is_empty() {
            return Ok(None);
        }
        let room = lp.size as usize + self.slack_after(lp);
        let extra = tuple.len().saturating_sub(room);
        if extra > self.free_space() {
            return Ok(None);
        }

        let old = self.data[lp.range()].to_vec();
        let start = if extra == 0 {
            lp.offset as usize
        } else {
            self.shift_tuples_below(lp.offset, -(extra as isize));
            lp.offset as usize - extra
        };
        self.data[start..start + tuple.len()].copy_from_slice(tuple);
        self.data[start + tuple.len()..lp.offset as usize + room].fill(0);
        self.slots[slot as usize] = LinePointer {
            offset: start as u16,
            size: tuple.len() as u16,
            tombstone: false,
        };
        Ok(Some(old))
    }

    /// Encodes the page into exactly `PAGE_SIZE` bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.data.clone();
        buf[..self.upper as usize].fill(0);

        write_i32(&mut buf, 0, self.page_id.as_i32());
        write_i32(&mut buf, 4, PageKind::Table.tag());
        write_i32(&mut buf, OFFSET_OID, self.oid.as_i32());
        write_i32(&mut buf, OFFSET_LSN, self.lsn.as_i32());
        write_i32(&mut buf, OFFSET_NEXT, self.next_page_id.as_i32());
        write_u16(&mut buf, OFFSET_LOWER, self.lower_offset());
        write_u16(&mut buf, OFFSET_UPPER, self.upper);

        for (i, lp) in self.slots.iter().enumerate() {
            let at = TABLE_PAGE_HEADER_SIZE + i * LINE_POINTER_SIZE;
            let (offset, size) = lp.encode();
            write_u16(&mut buf, at, offset);
            write_u16(&mut buf, at + 2, size);
        }
        buf
    }

    /// Decodes a table page image.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageCorruption`] if the header offsets or any
    /// line pointer are inconsistent.
    pub fn deserialize(bytes: &[u8]) -> CoreResult<Self> {
        let page_id = PageId::new(read_i32(bytes, 0));
        let lower = read_u16(bytes, OFFSET_LOWER) as usize;
        let upper = read_u16(bytes, OFFSET_UPPER) as usize;

        if lower < TABLE_PAGE_HEADER_SIZE
            || lower > upper
            || upper > PAGE_SIZE
            || (lower - TABLE_PAGE_HEADER_SIZE) % LINE_POINTER_SIZE != 0
        {
            return Err(CoreError::page_corruption(format!(
                "{page_id} has invalid offsets lower={lower} upper={upper}"
            )));
        }

        let count = (lower - TABLE_PAGE_HEADER_SIZE) / LINE_POINTER_SIZE;
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let at = TABLE_PAGE_HEADER_SIZE + i * LINE_POINTER_SIZE;
            let lp = LinePointer::decode(read_u16(bytes, at), read_u16(bytes, at + 2));
            if lp.state() != SlotState::Gone
                && (lp.range().start < upper || lp.range().end > PAGE_SIZE)
            {
                return Err(CoreError::page_corruption(format!(
                    "{page_id} slot {i} points outside the tuple area"
                )));
            }
            slots.push(lp);
        }

        let mut data = bytes.to_vec();
        data[..upper].fill(0);

        Ok(Self {
            page_id,
            oid: Oid::new(read_i32(bytes, OFFSET_OID)),
            lsn: Lsn::new(read_i32(bytes, OFFSET_LSN)),
            next_page_id: PageId::new(read_i32(bytes, OFFSET_NEXT)),
            upper: upper as u16,
            slots,
            data,
        })
    }

    /// Writes `tuple` at the top of the tuple area and returns its offset.
    fn place(&mut self, tuple: &[u8]) -> u16 {
        let start = self.upper as usize - tuple.len();
        self.data[start..start + tuple.len()].copy_from_slice(tuple);
        self.upper = start as u16;
        start as u16
    }

    /// Unused bytes between the end of `lp` and the next tuple up the page.
    fn slack_after(&self, lp: LinePointer) -> usize {
        let end = lp.range().end;
        self.slots
            .iter()
            .filter(|other| other.state() != SlotState::Gone && other.offset as usize >= end)
            .map(|other| other.offset as usize)
            .min()
            .unwrap_or(PAGE_SIZE)
            - end
    }

    /// Moves every tuple stored below `boundary` by `shift` bytes.
    ///
    /// A positive shift closes a gap (tuples move toward the page end); a
    /// negative one opens room. Line pointers follow their tuples.
    fn shift_tuples_below(&mut self, boundary: u16, shift: isize) {
        if shift == 0 {
            return;
        }
        let upper = self.upper as usize;
        let boundary = boundary as usize;
        let dest = (upper as isize + shift) as usize;
        self.data.copy_within(upper..boundary, dest);

        for lp in &mut self.slots {
            if lp.state() != SlotState::Gone && (lp.offset as usize) < boundary {
                lp.offset = (lp.offset as isize + shift) as u16;
            }
        }
        self.upper = dest as u16;
        let (lo, hi) = if shift > 0 {
            (upper, dest)
        } else {
            (dest, dest)
        };
        self.data[lo..hi].fill(0);
    }
}
