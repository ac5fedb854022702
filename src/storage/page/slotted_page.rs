use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::codec;
use crate::storage::page::{
    MAX_RECORD_SIZE, MIN_RECORD_SIZE, PAGE_SIZE, PAGE_SLOT_SIZE, PageHeader, PageId,
    RECORD_PREFIX_SIZE, RecordId, Slot, SlotId, SlotStatus,
};
use std::fmt;

/// In-memory slotted page.
///
/// `data` always holds the exact on-disk image: every mutation re-encodes
/// the header and slot directory into it, so encoding is a plain copy.
#[derive(Clone, PartialEq, Eq)]
pub struct SlottedPage {
    header: PageHeader,
    /// Slot entries indexed by slot id
    slots: Vec<Slot>,
    /// Slot ids in directory order, sorted by record prefix
    directory: Vec<SlotId>,
    data: Box<[u8; PAGE_SIZE]>,
}

impl SlottedPage {
    pub fn new(page_id: PageId) -> Self {
        let mut page = Self {
            header: PageHeader::fresh(page_id),
            slots: Vec::new(),
            directory: Vec::new(),
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.write_layout();
        page
    }

    /// Rebuilds a page from a decoded header, its slot entries in directory
    /// order and the raw page image, checking the layout invariants.
    pub(crate) fn from_parts(
        header: PageHeader,
        entries: Vec<Slot>,
        data: Box<[u8; PAGE_SIZE]>,
    ) -> StorageResult<Self> {
        let page_id = header.page_id;
        let count = header.slot_count as usize;

        if header.free_space_upper as usize > PAGE_SIZE
            || header.free_space_lower > header.free_space_upper
            || (header.free_space_lower as usize) < codec::slot_position(count)
        {
            return Err(StorageError::corrupted(
                page_id,
                format!(
                    "free space bounds [{}, {}) do not fit {} slots",
                    header.free_space_lower, header.free_space_upper, count
                ),
            ));
        }
        if entries.len() != count {
            return Err(StorageError::corrupted(
                page_id,
                format!("expected {} slots, found {}", count, entries.len()),
            ));
        }

        let mut by_id: Vec<Option<Slot>> = vec![None; count];
        let mut directory = Vec::with_capacity(count);
        let mut free_slots = 0u16;
        let mut used_ranges = Vec::new();

        for slot in entries {
            let idx = slot.item_id as usize;
            if idx >= count || by_id[idx].is_some() {
                return Err(StorageError::corrupted(
                    page_id,
                    format!("slot id {} is out of range or duplicated", slot.item_id),
                ));
            }
            if slot.bounds().end > PAGE_SIZE || (slot.length as usize) < RECORD_PREFIX_SIZE {
                return Err(StorageError::corrupted(
                    page_id,
                    format!("slot {} has bad bounds {:?}", slot.item_id, slot.bounds()),
                ));
            }
            if slot.is_free() {
                free_slots += 1;
            } else {
                if slot.offset < header.free_space_upper {
                    return Err(StorageError::corrupted(
                        page_id,
                        format!("slot {} overlaps free space", slot.item_id),
                    ));
                }
                used_ranges.push(slot.bounds());
            }
            directory.push(slot.item_id);
            by_id[idx] = Some(slot);
        }

        if free_slots != header.free_slot_count {
            return Err(StorageError::corrupted(
                page_id,
                format!(
                    "header reports {} free slots, directory has {}",
                    header.free_slot_count, free_slots
                ),
            ));
        }

        used_ranges.sort_by_key(|range| range.start);
        if used_ranges.windows(2).any(|pair| pair[0].end > pair[1].start) {
            return Err(StorageError::corrupted(page_id, "record ranges overlap"));
        }

        Ok(Self {
            header,
            slots: by_id.into_iter().flatten().collect(),
            directory,
            data,
        })
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    pub fn next_page_id(&self) -> PageId {
        self.header.next_page_id
    }

    pub fn prev_page_id(&self) -> PageId {
        self.header.prev_page_id
    }

    pub fn has_overflow(&self) -> bool {
        self.header.has_overflow != 0
    }

    pub fn slot_count(&self) -> u16 {
        self.header.slot_count
    }

    pub fn free_slot_count(&self) -> u16 {
        self.header.free_slot_count
    }

    pub fn free_space(&self) -> usize {
        self.header.free_space()
    }

    pub fn is_free(&self) -> bool {
        self.header.is_free()
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<&Slot> {
        self.slots.get(slot_id as usize)
    }

    /// Slot entries in directory order.
    pub fn directory(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.directory.iter().map(|&id| &self.slots[id as usize])
    }

    /// The encoded page image.
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Checks the record size bounds and that the page has room for it.
    pub fn check_record(&self, size: usize) -> StorageResult<()> {
        if size < MIN_RECORD_SIZE {
            return Err(StorageError::RecordTooSmall {
                size,
                min: MIN_RECORD_SIZE,
            });
        }
        if size > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size,
                max: MAX_RECORD_SIZE,
            });
        }
        let available = self.free_space();
        if size >= available {
            return Err(StorageError::NoRoomInPage {
                required: size,
                available,
            });
        }
        Ok(())
    }

    /// Adds a record, reusing the first free slot if there is one.
    pub fn add_record(&mut self, record: &[u8]) -> StorageResult<RecordId> {
        self.check_record(record.len())?;
        let size = record.len() as u16;

        let slot_id = if self.header.free_slot_count > 0 {
            self.reuse_free_slot(size)?
        } else {
            self.append_slot(size)?
        };

        let bounds = self.slots[slot_id as usize].bounds();
        self.data[bounds].copy_from_slice(record);
        self.sort_directory();
        self.write_layout();

        Ok(RecordId::new(self.page_id(), slot_id))
    }

    fn reuse_free_slot(&mut self, size: u16) -> StorageResult<SlotId> {
        let slot_id = self
            .directory
            .iter()
            .copied()
            .find(|&id| self.slots[id as usize].is_free())
            .ok_or_else(|| {
                StorageError::InvariantViolation(format!(
                    "page {} reports {} free slots but none is free",
                    self.page_id(),
                    self.header.free_slot_count
                ))
            })?;

        self.header.free_slot_count -= 1;
        let slot = &mut self.slots[slot_id as usize];
        if size > slot.length {
            // Old space is too small, carve a fresh range off the free space
            self.header.free_space_upper -= size;
            slot.offset = self.header.free_space_upper;
        }
        slot.length = size;
        slot.status = SlotStatus::Used;

        Ok(slot_id)
    }

    fn append_slot(&mut self, size: u16) -> StorageResult<SlotId> {
        let required = size as usize + PAGE_SLOT_SIZE;
        let available = self.free_space();
        if required > available {
            return Err(StorageError::NoRoomInPage {
                required,
                available,
            });
        }

        let slot_id = self.header.slot_count;
        self.header.slot_count += 1;
        self.header.free_space_lower += PAGE_SLOT_SIZE as u16;
        self.header.free_space_upper -= size;

        self.slots.push(Slot {
            item_id: slot_id,
            status: SlotStatus::Used,
            offset: self.header.free_space_upper,
            length: size,
        });
        self.directory.push(slot_id);

        Ok(slot_id)
    }

    fn validate(&self, rid: RecordId) -> StorageResult<&Slot> {
        if rid.page_id != self.page_id() {
            return Err(StorageError::InvalidRecordId(rid));
        }
        self.slots
            .get(rid.slot_id as usize)
            .ok_or(StorageError::InvalidRecordId(rid))
    }

    /// Returns a copy of the record bytes.
    pub fn get_record(&self, rid: RecordId) -> StorageResult<Vec<u8>> {
        let slot = self.validate(rid)?;
        if slot.is_free() {
            return Err(StorageError::RecordFreed(rid));
        }
        Ok(self.data[slot.bounds()].to_vec())
    }

    /// Marks the record's slot free and zeroes its bytes. The byte range is
    /// only recovered by a later record reusing the same slot.
    pub fn del_record(&mut self, rid: RecordId) -> StorageResult<()> {
        let slot = *self.validate(rid)?;
        if slot.is_free() {
            return Ok(());
        }

        self.data[slot.bounds()].fill(0);
        self.slots[rid.slot_id as usize].status = SlotStatus::Free;
        self.header.free_slot_count += 1;
        // Zeroed prefix moves the slot; used slots keep their relative order
        self.sort_directory();
        self.write_layout();

        Ok(())
    }

    /// Ids of the used records in directory order.
    pub fn record_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        let page_id = self.page_id();
        self.directory
            .iter()
            .filter(|&&id| !self.slots[id as usize].is_free())
            .map(move |&id| RecordId::new(page_id, id))
    }

    /// Calls `f` for each used record until it returns false.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(RecordId) -> bool,
    {
        for rid in self.record_ids() {
            if !f(rid) {
                break;
            }
        }
    }

    /// Binary searches the directory for the first used record starting
    /// with `prefix`.
    pub fn find_record(&self, prefix: &[u8; RECORD_PREFIX_SIZE]) -> StorageResult<RecordId> {
        let start = self
            .directory
            .partition_point(|&id| self.record_prefix(id) < &prefix[..]);

        self.directory[start..]
            .iter()
            .take_while(|&&id| self.record_prefix(id) == &prefix[..])
            .find(|&&id| !self.slots[id as usize].is_free())
            .map(|&id| RecordId::new(self.page_id(), id))
            .ok_or(StorageError::RecordNotFound(self.page_id()))
    }

    /// Links this page to `next` as an overflow chain.
    pub fn link(&mut self, next: &mut SlottedPage) {
        self.header.next_page_id = next.page_id();
        self.header.has_overflow = 1;
        next.header.prev_page_id = self.page_id();
        next.header.has_overflow = 1;
        self.write_layout();
        next.write_layout();
    }

    /// Flags the page as part of an overflow chain without linking it, as
    /// for a chain of one page.
    pub fn mark_overflow(&mut self) {
        self.header.has_overflow = 1;
        self.write_layout();
    }

    /// Returns the page to its freshly allocated state, keeping its id.
    pub fn reset(&mut self) {
        *self = Self::new(self.page_id());
    }

    fn record_prefix(&self, slot_id: SlotId) -> &[u8] {
        let start = self.slots[slot_id as usize].offset as usize;
        &self.data[start..start + RECORD_PREFIX_SIZE]
    }

    fn sort_directory(&mut self) {
        let mut directory = std::mem::take(&mut self.directory);
        // sort_by is stable
        directory.sort_by(|&a, &b| self.record_prefix(a).cmp(self.record_prefix(b)));
        self.directory = directory;
    }

    fn write_layout(&mut self) {
        let Self {
            header,
            slots,
            directory,
            data,
        } = self;
        codec::encode_header(header, &mut data[..]);
        for (n, &id) in directory.iter().enumerate() {
            codec::encode_slot(&slots[id as usize], n, &mut data[..]);
        }
    }
}

/// Links page `a` to page `b`; see [`SlottedPage::link`].
pub fn link_pages(a: &mut SlottedPage, b: &mut SlottedPage) {
    a.link(b);
}

impl fmt::Debug for SlottedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlottedPage")
            .field("header", &self.header)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SlottedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        write!(
            f,
            "page {}: next={} prev={} overflow={} lower={} upper={} slots={} free_slots={}",
            h.page_id,
            h.next_page_id,
            h.prev_page_id,
            h.has_overflow,
            h.free_space_lower,
            h.free_space_upper,
            h.slot_count,
            h.free_slot_count
        )
    }
}
