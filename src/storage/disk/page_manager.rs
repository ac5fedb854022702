use crate::storage::disk::{FileStore, MemoryStore, PageIdAllocator, PageStore};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::codec;
use crate::storage::page::{PAGE_HEADER_SIZE, PAGE_SIZE, PageHeader, PageId, SlottedPage};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Maps page ids to offsets in a flat file of fixed-size pages and keeps an
/// in-memory index of every page header.
#[derive(Debug)]
pub struct PageManager {
    store: Box<dyn PageStore>,
    headers: BTreeMap<PageId, PageHeader>,
    /// Free pages handed out by `get_free_or_allocate` and not yet written
    claimed: HashSet<PageId>,
    /// Free pages that are not claimed
    free_pages: usize,
    page_ids: PageIdAllocator,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        Self::with_store(Box::new(FileStore::create(path)?))
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_store(Box::new(FileStore::open(path)?))
    }

    pub fn open_or_create(path: &Path) -> StorageResult<Self> {
        Self::with_store(Box::new(FileStore::open_or_create(path)?))
    }

    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            headers: BTreeMap::new(),
            claimed: HashSet::new(),
            free_pages: 0,
            page_ids: PageIdAllocator::default(),
        }
    }

    /// Builds a manager over an arbitrary store and loads its page headers.
    pub fn with_store(store: Box<dyn PageStore>) -> StorageResult<Self> {
        let mut manager = Self {
            store,
            headers: BTreeMap::new(),
            claimed: HashSet::new(),
            free_pages: 0,
            page_ids: PageIdAllocator::default(),
        };
        manager.load()?;
        Ok(manager)
    }

    /// Scans every page header in the store to rebuild the header index.
    fn load(&mut self) -> StorageResult<()> {
        let size = self.store.size()?;
        let page_count = size / PAGE_SIZE as u64;
        if size % PAGE_SIZE as u64 != 0 {
            warn!(
                "Ignoring {} trailing bytes after page {}",
                size % PAGE_SIZE as u64,
                page_count
            );
        }

        let mut buf = [0u8; PAGE_HEADER_SIZE];
        for index in 0..page_count {
            let page_id = PageId(index as u32);
            self.store.read_at(&mut buf, Self::page_offset(page_id))?;

            let header = if codec::is_zeroed_header(&buf) {
                PageHeader::fresh(page_id)
            } else {
                let header = codec::decode_header(&buf)?;
                if header.page_id != page_id {
                    return Err(StorageError::corrupted(
                        page_id,
                        format!("header carries page id {}", header.page_id),
                    ));
                }
                header
            };

            if header.is_free() {
                self.free_pages += 1;
            }
            self.headers.insert(page_id, header);
        }

        self.page_ids = PageIdAllocator::new(page_count as u32);
        debug!(
            "Loaded {} page headers ({} free)",
            page_count, self.free_pages
        );
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }

    fn is_available(&self, page_id: PageId, header: &PageHeader) -> bool {
        header.is_free() && !self.claimed.contains(&page_id)
    }

    /// Pages skipped over by a write past the end of the file read back
    /// as zeros. An id the allocator already handed out may still belong to
    /// a caller that has not written it, so it stays claimed until a reload.
    /// Ids never handed out are free at once.
    fn track_gap(&mut self, page_id: PageId) {
        let known = self.headers.keys().next_back().map_or(0, |id| id.0 + 1);
        let allocated = self.page_ids.peek();
        for id in (known..page_id.0).map(PageId) {
            self.headers.insert(id, PageHeader::fresh(id));
            if id < allocated {
                self.claimed.insert(id);
            } else {
                self.free_pages += 1;
            }
        }
    }

    fn update_header(&mut self, header: PageHeader) {
        let page_id = header.page_id;
        let was_available = self
            .headers
            .get(&page_id)
            .is_some_and(|h| self.is_available(page_id, h));

        self.claimed.remove(&page_id);
        let now_available = header.is_free();
        self.headers.insert(page_id, header);

        match (was_available, now_available) {
            (true, false) => self.free_pages -= 1,
            (false, true) => self.free_pages += 1,
            _ => {}
        }
    }

    /// Returns a fresh, empty page with a new id. Nothing is written until
    /// `write_page` is called.
    pub fn allocate_page(&self) -> SlottedPage {
        let page_id = self.page_ids.allocate();
        debug!("Allocated page {}", page_id);
        SlottedPage::new(page_id)
    }

    /// Returns a free page if there is one, otherwise allocates a new one.
    pub fn get_free_or_allocate(&mut self) -> StorageResult<SlottedPage> {
        if self.free_pages > 0 {
            let candidate = self
                .headers
                .iter()
                .find(|(page_id, header)| self.is_available(**page_id, header))
                .map(|(page_id, _)| *page_id);

            let Some(page_id) = candidate else {
                return Err(StorageError::InvariantViolation(format!(
                    "{} free pages counted but none found",
                    self.free_pages
                )));
            };

            let page = self.read_page(page_id)?;
            self.claimed.insert(page_id);
            self.free_pages -= 1;
            debug!("Reusing free page {}", page_id);
            return Ok(page);
        }

        Ok(self.allocate_page())
    }

    /// Reads the raw image of a page into `buf`.
    pub fn read_page_data(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        codec::check_page_size(buf)?;

        let offset = Self::page_offset(page_id);
        if offset + PAGE_SIZE as u64 > self.store.size()? {
            return Err(StorageError::PageNotFound(page_id));
        }
        self.store.read_at(buf, offset)?;
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId) -> StorageResult<SlottedPage> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_page_data(page_id, &mut buf)?;

        if codec::is_zeroed_header(&buf) {
            return Ok(SlottedPage::new(page_id));
        }

        let page = codec::decode_page(&buf)?;
        if page.page_id() != page_id {
            return Err(StorageError::corrupted(
                page_id,
                format!("header carries page id {}", page.page_id()),
            ));
        }
        Ok(page)
    }

    /// Reads an overflow chain starting at `page_id`, following
    /// `next_page_id` until it is 0.
    pub fn read_pages(&mut self, page_id: PageId) -> StorageResult<Vec<SlottedPage>> {
        let first = self.read_page(page_id)?;
        if !first.has_overflow() {
            return Err(StorageError::PageIsNotOverflow(page_id));
        }

        let mut seen = HashSet::from([page_id]);
        let mut next = first.next_page_id();
        let mut pages = vec![first];

        while next != PageId(0) {
            if !seen.insert(next) {
                return Err(StorageError::corrupted(
                    next,
                    format!("overflow chain from page {} loops", page_id),
                ));
            }
            let page = self.read_page(next)?;
            next = page.next_page_id();
            pages.push(page);
        }

        Ok(pages)
    }

    pub fn write_page(&mut self, page: &SlottedPage) -> StorageResult<()> {
        let page_id = page.page_id();
        self.store
            .write_at(page.as_bytes(), Self::page_offset(page_id))
            .map_err(|source| StorageError::WritingPageFailed { page_id, source })?;

        self.track_gap(page_id);
        self.update_header(*page.header());
        self.page_ids.advance_past(page_id);
        Ok(())
    }

    pub fn write_pages(&mut self, pages: &[SlottedPage]) -> StorageResult<()> {
        for page in pages {
            self.write_page(page)?;
        }
        Ok(())
    }

    /// Overwrites the page on disk with an empty page carrying the same id
    /// and marks it reusable. The page stays in the file.
    pub fn delete_page(&mut self, page_id: PageId) -> StorageResult<()> {
        let empty = SlottedPage::new(page_id);
        self.store
            .write_at(empty.as_bytes(), Self::page_offset(page_id))
            .map_err(|source| StorageError::DeletingPageFailed { page_id, source })?;

        self.track_gap(page_id);
        self.update_header(*empty.header());
        self.page_ids.advance_past(page_id);
        debug!("Deleted page {}", page_id);
        Ok(())
    }

    /// Ids of every page whose header reports it free.
    pub fn free_page_ids(&self) -> Vec<PageId> {
        self.headers
            .iter()
            .filter(|(_, header)| header.is_free())
            .map(|(page_id, _)| *page_id)
            .collect()
    }

    pub fn header(&self, page_id: PageId) -> Option<&PageHeader> {
        self.headers.get(&page_id)
    }

    /// Number of pages in the file, free ones included.
    pub fn page_count(&self) -> usize {
        self.headers.len()
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.store.sync()?;
        Ok(())
    }

    pub fn close(mut self) -> StorageResult<()> {
        self.store.close()?;
        Ok(())
    }
}
