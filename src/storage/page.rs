//! Page identifiers and the fixed slotted-page layout.
//!
//! A page is `PAGE_SIZE` bytes: a 24 byte header, then a slot directory
//! growing upward, then record payloads growing downward from the end of
//! the page.
//!
//! ```text
//! 0        24                 lower          upper              PAGE_SIZE
//! | header | slot 0 | slot 1 | ... free ... | record 1 | record 0 |
//! ```

pub mod codec;
pub mod slotted_page;

use std::fmt;
use std::ops::Range;

pub use slotted_page::{SlottedPage, link_pages};

pub const PAGE_SIZE: usize = 8192;
pub const PAGE_HEADER_SIZE: usize = 24;
pub const PAGE_SLOT_SIZE: usize = 8;
pub const MIN_RECORD_SIZE: usize = PAGE_SLOT_SIZE;
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - PAGE_SLOT_SIZE;

/// Number of leading payload bytes the slot directory is ordered by.
pub const RECORD_PREFIX_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type SlotId = u16;

/// Address of a single record: the page it lives in and its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SlotStatus {
    Free = 0,
    Used = 1,
}

impl SlotStatus {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Free),
            1 => Some(Self::Used),
            _ => None,
        }
    }
}

/// Fixed 24 byte page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
    pub free_space_lower: u16,
    pub free_space_upper: u16,
    pub slot_count: u16,
    pub free_slot_count: u16,
    pub has_overflow: u16,
    pub reserved: u16,
}

impl PageHeader {
    /// Header of a freshly allocated, empty page.
    pub fn fresh(page_id: PageId) -> Self {
        Self {
            page_id,
            next_page_id: PageId(0),
            prev_page_id: PageId(0),
            free_space_lower: PAGE_HEADER_SIZE as u16,
            free_space_upper: PAGE_SIZE as u16,
            slot_count: 0,
            free_slot_count: 0,
            has_overflow: 0,
            reserved: 0,
        }
    }

    /// Contiguous free bytes between the slot directory and the payloads.
    pub fn free_space(&self) -> usize {
        self.free_space_upper.saturating_sub(self.free_space_lower) as usize
    }

    /// A page is free once every slot it ever handed out has been deleted.
    pub fn is_free(&self) -> bool {
        self.free_slot_count == self.slot_count
    }
}

/// 8 byte slot directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub item_id: SlotId,
    pub status: SlotStatus,
    pub offset: u16,
    pub length: u16,
}

impl Slot {
    /// Byte range of the record within the page.
    pub fn bounds(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }

    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }
}
