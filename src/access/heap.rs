use crate::storage::buffer::{BufferPoolManager, PageGuard};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{MAX_RECORD_SIZE, MIN_RECORD_SIZE, PageId, RecordId, SlottedPage};
use log::debug;
use std::collections::HashSet;

/// Unordered collection of records spread over heap pages behind a buffer
/// pool. New records go to the last page; a fresh page is added when it
/// runs out of room.
pub struct RecordHeap {
    buffer_pool: BufferPoolManager,
    pages: Vec<PageId>,
}

impl RecordHeap {
    pub fn new(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            pages: Vec::new(),
        }
    }

    /// Reopens a heap over pages written earlier.
    pub fn with_pages(buffer_pool: BufferPoolManager, pages: Vec<PageId>) -> Self {
        Self { buffer_pool, pages }
    }

    pub fn page_ids(&self) -> &[PageId] {
        &self.pages
    }

    /// Inserts a record, adding a page and retrying once if the last page is
    /// full.
    pub fn insert(&mut self, data: &[u8]) -> StorageResult<RecordId> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(StorageError::RecordTooSmall {
                size: data.len(),
                min: MIN_RECORD_SIZE,
            });
        }
        if data.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: data.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        if let Some(&last) = self.pages.last() {
            let mut guard = self.buffer_pool.fetch_guarded(last)?;
            let inserted = guard.write().add_record(data);
            match inserted {
                // Sizes were checked above, so only a full page gets here
                Err(e) if e.is_recoverable() => {}
                other => return other,
            }
        }

        let mut guard = self.buffer_pool.new_guarded()?;
        let rid = guard.write().add_record(data)?;
        self.pages.push(guard.page_id());
        debug!("Heap grew to {} pages", self.pages.len());
        Ok(rid)
    }

    /// Returns the record, or None if it was deleted or never existed.
    pub fn get(&self, rid: RecordId) -> StorageResult<Option<Vec<u8>>> {
        let guard = self.buffer_pool.fetch_guarded(rid.page_id)?;
        let record = guard.read().get_record(rid);
        match record {
            Ok(data) => Ok(Some(data)),
            Err(StorageError::RecordFreed(_)) | Err(StorageError::InvalidRecordId(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&mut self, rid: RecordId) -> StorageResult<()> {
        let mut guard = self.buffer_pool.fetch_guarded(rid.page_id)?;
        let deleted = guard.write().del_record(rid);
        deleted
    }

    /// All live records, page by page in slot directory order.
    pub fn scan(&self) -> StorageResult<Vec<(RecordId, Vec<u8>)>> {
        let mut records = Vec::new();
        for &page_id in &self.pages {
            let guard = self.buffer_pool.fetch_guarded(page_id)?;
            let page = guard.read();
            for rid in page.record_ids() {
                records.push((rid, page.get_record(rid)?));
            }
        }
        Ok(records)
    }

    /// Stores a record of any size on a chain of freshly allocated, linked
    /// pages. Returns the id of the first page of the chain.
    pub fn insert_overflow(&mut self, data: &[u8]) -> StorageResult<PageId> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(StorageError::RecordTooSmall {
                size: data.len(),
                min: MIN_RECORD_SIZE,
            });
        }

        // Even chunks, so the last one never drops below the minimum size
        let count = data.len().div_ceil(MAX_RECORD_SIZE);
        let chunk_size = data.len().div_ceil(count);

        let mut head = None;
        let mut prev: Option<PageGuard> = None;
        for chunk in data.chunks(chunk_size) {
            let mut guard = self.buffer_pool.new_guarded()?;
            match prev.as_mut() {
                Some(prev) => prev.write().link(&mut guard.write()),
                None => {
                    head = Some(guard.page_id());
                    guard.write().mark_overflow();
                }
            }
            guard.write().add_record(chunk)?;
            prev = Some(guard);
        }

        let head = head.ok_or_else(|| {
            StorageError::InvariantViolation("overflow record produced no pages".to_string())
        })?;
        debug!(
            "Stored {} byte record on {} overflow pages from page {}",
            data.len(),
            count,
            head
        );
        Ok(head)
    }

    /// Reassembles a record written by `insert_overflow`.
    pub fn read_overflow(&self, head: PageId) -> StorageResult<Vec<u8>> {
        let mut data = Vec::new();
        self.walk_overflow(head, |page| {
            for rid in page.record_ids() {
                data.extend_from_slice(&page.get_record(rid)?);
            }
            Ok(())
        })?;
        Ok(data)
    }

    /// Deletes every page of an overflow chain.
    pub fn delete_overflow(&mut self, head: PageId) -> StorageResult<()> {
        let mut page_ids = Vec::new();
        self.walk_overflow(head, |page| {
            page_ids.push(page.page_id());
            Ok(())
        })?;

        for page_id in page_ids {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Visits the chain starting at `head`, pinning one page at a time.
    fn walk_overflow<F>(&self, head: PageId, mut visit: F) -> StorageResult<()>
    where
        F: FnMut(&SlottedPage) -> StorageResult<()>,
    {
        let mut seen = HashSet::new();
        let mut page_id = head;
        loop {
            if !seen.insert(page_id) {
                return Err(StorageError::CorruptedPage {
                    page_id,
                    reason: format!("overflow chain from page {} loops", head),
                });
            }

            let guard = self.buffer_pool.fetch_guarded(page_id)?;
            let page = guard.read();
            if !page.has_overflow() {
                return Err(StorageError::PageIsNotOverflow(page_id));
            }
            visit(&page)?;

            page_id = page.next_page_id();
            if page_id == PageId(0) {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::PageManager;
    use anyhow::Result;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn create_test_heap(pool_size: usize) -> Result<RecordHeap> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let replacer = Box::new(LruReplacer::new(pool_size));
        let buffer_pool = BufferPoolManager::new(page_manager, replacer, pool_size);
        Ok(RecordHeap::new(buffer_pool))
    }

    #[test]
    fn test_empty_heap() -> Result<()> {
        let heap = create_test_heap(4)?;
        assert!(heap.scan()?.is_empty());
        // The page was never written
        assert!(heap.get(RecordId::new(PageId(0), 0)).is_err());
        Ok(())
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let mut heap = create_test_heap(4)?;

        let rid = heap.insert(b"Hello, World!")?;
        assert_eq!(heap.get(rid)?.as_deref(), Some(&b"Hello, World!"[..]));
        Ok(())
    }

    #[test]
    fn test_multiple_inserts_share_page() -> Result<()> {
        let mut heap = create_test_heap(4)?;

        let rid1 = heap.insert(b"First record")?;
        let rid2 = heap.insert(b"Second record")?;
        let rid3 = heap.insert(b"Third record")?;

        assert_eq!(rid1.page_id, rid2.page_id);
        assert_eq!(rid2.page_id, rid3.page_id);
        assert_ne!(rid1.slot_id, rid2.slot_id);
        assert_eq!(heap.page_ids().len(), 1);

        assert_eq!(heap.get(rid3)?.unwrap(), b"Third record");
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let mut heap = create_test_heap(4)?;
        let rid = heap.insert(b"To be deleted")?;
        assert!(heap.get(rid)?.is_some());

        heap.delete(rid)?;
        assert!(heap.get(rid)?.is_none());
        assert!(heap.scan()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_bad_record_sizes_are_not_retried() -> Result<()> {
        let mut heap = create_test_heap(4)?;
        assert!(matches!(
            heap.insert(b"tiny"),
            Err(StorageError::RecordTooSmall { .. })
        ));
        assert!(matches!(
            heap.insert(&vec![0u8; MAX_RECORD_SIZE + 1]),
            Err(StorageError::RecordTooLarge { .. })
        ));
        // Nothing was allocated for the rejected records
        assert!(heap.page_ids().is_empty());
        Ok(())
    }

    #[test]
    fn test_page_boundary() -> Result<()> {
        let mut heap = create_test_heap(2)?;
        let large = vec![0xAA; 1000];

        let mut rids = Vec::new();
        for _ in 0..20 {
            rids.push(heap.insert(&large)?);
        }

        // Eight 1000 byte records fit a page
        assert_eq!(heap.page_ids().len(), 3);
        assert_eq!(rids[7].page_id, rids[0].page_id);
        assert_ne!(rids[8].page_id, rids[0].page_id);

        for rid in &rids {
            assert_eq!(heap.get(*rid)?.unwrap(), large);
        }
        assert_eq!(heap.scan()?.len(), 20);
        Ok(())
    }

    #[test]
    fn test_scan_follows_directory_order() -> Result<()> {
        let mut heap = create_test_heap(4)?;
        heap.insert(b"record-c")?;
        heap.insert(b"record-a")?;
        heap.insert(b"record-b")?;

        let records: Vec<Vec<u8>> = heap.scan()?.into_iter().map(|(_, data)| data).collect();
        assert_eq!(
            records,
            vec![b"record-a".to_vec(), b"record-b".to_vec(), b"record-c".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_overflow_round_trip() -> Result<()> {
        let mut heap = create_test_heap(2)?;
        let mut rng = StdRng::seed_from_u64(42);
        let data: Vec<u8> = (0..3 * MAX_RECORD_SIZE + 100).map(|_| rng.gen()).collect();

        let head = heap.insert_overflow(&data)?;
        assert_eq!(heap.read_overflow(head)?, data);

        // Overflow pages are not part of the heap's own pages
        assert!(heap.page_ids().is_empty());
        Ok(())
    }

    #[test]
    fn test_overflow_single_page() -> Result<()> {
        let mut heap = create_test_heap(2)?;
        let head = heap.insert_overflow(b"fits in one page")?;
        assert_eq!(heap.read_overflow(head)?, b"fits in one page");
        Ok(())
    }

    #[test]
    fn test_overflow_rejects_plain_page() -> Result<()> {
        let mut heap = create_test_heap(2)?;
        let rid = heap.insert(b"plain heap record")?;
        assert!(matches!(
            heap.read_overflow(rid.page_id),
            Err(StorageError::PageIsNotOverflow(_))
        ));
        assert!(matches!(
            heap.insert_overflow(b"short"),
            Err(StorageError::RecordTooSmall { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_delete_overflow() -> Result<()> {
        let mut heap = create_test_heap(4)?;
        let data = vec![7u8; MAX_RECORD_SIZE + 1];
        let head = heap.insert_overflow(&data)?;

        heap.delete_overflow(head)?;
        assert!(matches!(
            heap.read_overflow(head),
            Err(StorageError::PageIsNotOverflow(_))
        ));
        Ok(())
    }
}
