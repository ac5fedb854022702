//! Binary encoding of the page header and slot directory.
//!
//! All fields are little-endian. The header occupies bytes `[0, 24)` and
//! slot `n` occupies `[24 + 8n, 32 + 8n)`.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{
    PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_SLOT_SIZE, PageHeader, PageId, Slot, SlotStatus,
    SlottedPage,
};
use byteorder::{ByteOrder, LittleEndian};

const PAGE_ID_OFFSET: usize = 0;
const NEXT_PAGE_ID_OFFSET: usize = 4;
const PREV_PAGE_ID_OFFSET: usize = 8;
const FREE_SPACE_LOWER_OFFSET: usize = 12;
const FREE_SPACE_UPPER_OFFSET: usize = 14;
const SLOT_COUNT_OFFSET: usize = 16;
const FREE_SLOT_COUNT_OFFSET: usize = 18;
const HAS_OVERFLOW_OFFSET: usize = 20;
const RESERVED_OFFSET: usize = 22;

// Offsets within a slot entry
const ITEM_ID_OFFSET: usize = 0;
const ITEM_STATUS_OFFSET: usize = 2;
const ITEM_OFFSET_OFFSET: usize = 4;
const ITEM_LENGTH_OFFSET: usize = 6;

/// Byte position of the `n`th slot directory entry.
pub fn slot_position(n: usize) -> usize {
    PAGE_HEADER_SIZE + n * PAGE_SLOT_SIZE
}

pub fn check_page_size(buf: &[u8]) -> StorageResult<()> {
    if buf.len() != PAGE_SIZE {
        return Err(StorageError::BadPageSize {
            expected: PAGE_SIZE,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub fn decode_header(buf: &[u8]) -> StorageResult<PageHeader> {
    if buf.len() < PAGE_HEADER_SIZE {
        return Err(StorageError::BadPageSize {
            expected: PAGE_HEADER_SIZE,
            actual: buf.len(),
        });
    }

    Ok(PageHeader {
        page_id: PageId(LittleEndian::read_u32(&buf[PAGE_ID_OFFSET..])),
        next_page_id: PageId(LittleEndian::read_u32(&buf[NEXT_PAGE_ID_OFFSET..])),
        prev_page_id: PageId(LittleEndian::read_u32(&buf[PREV_PAGE_ID_OFFSET..])),
        free_space_lower: LittleEndian::read_u16(&buf[FREE_SPACE_LOWER_OFFSET..]),
        free_space_upper: LittleEndian::read_u16(&buf[FREE_SPACE_UPPER_OFFSET..]),
        slot_count: LittleEndian::read_u16(&buf[SLOT_COUNT_OFFSET..]),
        free_slot_count: LittleEndian::read_u16(&buf[FREE_SLOT_COUNT_OFFSET..]),
        has_overflow: LittleEndian::read_u16(&buf[HAS_OVERFLOW_OFFSET..]),
        reserved: LittleEndian::read_u16(&buf[RESERVED_OFFSET..]),
    })
}

/// Writes the header into `buf[0..24]`. `buf` must hold at least a header.
pub fn encode_header(header: &PageHeader, buf: &mut [u8]) {
    LittleEndian::write_u32(&mut buf[PAGE_ID_OFFSET..], header.page_id.0);
    LittleEndian::write_u32(&mut buf[NEXT_PAGE_ID_OFFSET..], header.next_page_id.0);
    LittleEndian::write_u32(&mut buf[PREV_PAGE_ID_OFFSET..], header.prev_page_id.0);
    LittleEndian::write_u16(&mut buf[FREE_SPACE_LOWER_OFFSET..], header.free_space_lower);
    LittleEndian::write_u16(&mut buf[FREE_SPACE_UPPER_OFFSET..], header.free_space_upper);
    LittleEndian::write_u16(&mut buf[SLOT_COUNT_OFFSET..], header.slot_count);
    LittleEndian::write_u16(&mut buf[FREE_SLOT_COUNT_OFFSET..], header.free_slot_count);
    LittleEndian::write_u16(&mut buf[HAS_OVERFLOW_OFFSET..], header.has_overflow);
    LittleEndian::write_u16(&mut buf[RESERVED_OFFSET..], header.reserved);
}

pub fn decode_slot(buf: &[u8], n: usize, page_id: PageId) -> StorageResult<Slot> {
    let pos = slot_position(n);
    if pos + PAGE_SLOT_SIZE > buf.len() {
        return Err(StorageError::corrupted(
            page_id,
            format!("slot {} lies outside the page", n),
        ));
    }
    let entry = &buf[pos..pos + PAGE_SLOT_SIZE];

    let raw_status = LittleEndian::read_u16(&entry[ITEM_STATUS_OFFSET..]);
    let status = SlotStatus::from_u16(raw_status).ok_or_else(|| {
        StorageError::corrupted(page_id, format!("slot {} has status {}", n, raw_status))
    })?;

    Ok(Slot {
        item_id: LittleEndian::read_u16(&entry[ITEM_ID_OFFSET..]),
        status,
        offset: LittleEndian::read_u16(&entry[ITEM_OFFSET_OFFSET..]),
        length: LittleEndian::read_u16(&entry[ITEM_LENGTH_OFFSET..]),
    })
}

/// Writes `slot` as the `n`th directory entry.
pub fn encode_slot(slot: &Slot, n: usize, buf: &mut [u8]) {
    let pos = slot_position(n);
    let entry = &mut buf[pos..pos + PAGE_SLOT_SIZE];
    LittleEndian::write_u16(&mut entry[ITEM_ID_OFFSET..], slot.item_id);
    LittleEndian::write_u16(&mut entry[ITEM_STATUS_OFFSET..], slot.status as u16);
    LittleEndian::write_u16(&mut entry[ITEM_OFFSET_OFFSET..], slot.offset);
    LittleEndian::write_u16(&mut entry[ITEM_LENGTH_OFFSET..], slot.length);
}

/// Decodes a full page image. Slots are read sequentially from offset 24
/// and the result is validated against the layout invariants.
pub fn decode_page(buf: &[u8]) -> StorageResult<SlottedPage> {
    check_page_size(buf)?;
    let header = decode_header(buf)?;

    let slots = (0..header.slot_count as usize)
        .map(|n| decode_slot(buf, n, header.page_id))
        .collect::<StorageResult<Vec<_>>>()?;

    let mut data = Box::new([0u8; PAGE_SIZE]);
    data.copy_from_slice(buf);

    SlottedPage::from_parts(header, slots, data)
}

/// Encodes `page` into `buf`, which must be exactly `PAGE_SIZE` bytes.
pub fn encode_page(page: &SlottedPage, buf: &mut [u8]) -> StorageResult<()> {
    check_page_size(buf)?;
    buf.copy_from_slice(page.as_bytes());
    Ok(())
}

/// Returns true when the header bytes are all zero, i.e. the page was
/// never written.
pub fn is_zeroed_header(buf: &[u8]) -> bool {
    buf.len() >= PAGE_HEADER_SIZE && buf[..PAGE_HEADER_SIZE].iter().all(|&b| b == 0)
}
