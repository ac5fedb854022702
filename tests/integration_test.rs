use anyhow::Result;
use pagerdb::access::RecordHeap;
use pagerdb::storage::buffer::lru::LruReplacer;
use pagerdb::storage::page::link_pages;
use pagerdb::storage::{
    BufferPoolConfig, BufferPoolManager, PageId, PageManager, RecordId, ReplacerKind,
    SlottedPage, StorageError,
};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

#[test]
fn test_record_lifecycle_scenario() -> Result<()> {
    let mut page = SlottedPage::new(PageId(1));

    assert!(matches!(
        page.add_record(b"short"),
        Err(StorageError::RecordTooSmall { size: 5, .. })
    ));

    let rid = page.add_record(b"exactly8")?;
    assert_eq!(page.get_record(rid)?, b"exactly8");

    page.del_record(rid)?;
    assert!(matches!(page.get_record(rid), Err(StorageError::RecordFreed(_))));
    assert!(page.is_free());

    let again = page.add_record(b"another8")?;
    assert_eq!(again.slot_id, rid.slot_id);
    Ok(())
}

#[test]
fn test_linked_pages_read_back_in_order() -> Result<()> {
    let dir = tempdir()?;
    let mut pm = PageManager::create(&dir.path().join("chain.db"))?;

    let mut p1 = pm.allocate_page();
    let mut p2 = pm.allocate_page();
    link_pages(&mut p1, &mut p2);
    p1.add_record(&[0x11; 32])?;
    p2.add_record(&[0x22; 32])?;
    pm.write_pages(&[p1.clone(), p2.clone()])?;

    let chain = pm.read_pages(p1.page_id())?;
    let ids: Vec<PageId> = chain.iter().map(|p| p.page_id()).collect();
    assert_eq!(ids, vec![p1.page_id(), p2.page_id()]);
    assert_eq!(chain, vec![p1, p2]);
    Ok(())
}

#[test]
fn test_pool_of_two_evicts_and_flushes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pool.db");

    {
        let mut pm = PageManager::create(&path)?;
        for i in 0..4u32 {
            let mut page = SlottedPage::new(PageId(i));
            page.add_record(format!("original-{}", i).as_bytes())?;
            pm.write_page(&page)?;
        }
        pm.close()?;
    }

    for kind in [ReplacerKind::Lru, ReplacerKind::Clock] {
        let pm = PageManager::open(&path)?;
        let config = BufferPoolConfig::new(2).with_replacer(kind);
        let pool = BufferPoolManager::from_config(pm, &config)?;

        let p1 = pool.fetch_page(PageId(1))?;
        let p2 = pool.fetch_page(PageId(2))?;
        let rid = p1.write().add_record(format!("dirty-{}", kind).as_bytes())?;
        pool.unpin_page(PageId(1), true)?;
        pool.unpin_page(PageId(2), false)?;
        drop((p1, p2));

        let _p3 = pool.fetch_page(PageId(3))?;
        let resident = pool.resident_pages();
        assert_eq!(resident.len(), 2);
        assert!(resident.contains(&PageId(3)));

        // Whichever page was evicted, the dirty record is never lost
        pool.flush_all()?;
        let on_disk = pool.with_page_manager(|pm| pm.read_page(PageId(1)))?;
        assert_eq!(on_disk.get_record(rid)?, format!("dirty-{}", kind).as_bytes());
    }
    Ok(())
}

#[test]
fn test_heap_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("heap.db");

    let (rids, pages, head) = {
        let pm = PageManager::create(&path)?;
        let pool = BufferPoolManager::new(pm, Box::new(LruReplacer::new(3)), 3);
        let mut heap = RecordHeap::new(pool.clone());

        let mut rids = Vec::new();
        for i in 0..200u32 {
            rids.push(heap.insert(format!("record number {:05}", i).as_bytes())?);
        }
        let big = vec![0xCD; 20_000];
        let head = heap.insert_overflow(&big)?;

        pool.flush_all()?;
        (rids, heap.page_ids().to_vec(), head)
    };

    let pm = PageManager::open(&path)?;
    assert!(pm.page_count() >= pages.len());
    let pool = BufferPoolManager::from_config(pm, &BufferPoolConfig::default())?;
    let heap = RecordHeap::with_pages(pool, pages);

    for (i, rid) in rids.iter().enumerate() {
        let expected = format!("record number {:05}", i);
        assert_eq!(heap.get(*rid)?.as_deref(), Some(expected.as_bytes()));
    }
    assert_eq!(heap.scan()?.len(), 200);
    assert_eq!(heap.read_overflow(head)?, vec![0xCD; 20_000]);
    Ok(())
}

#[test]
fn test_deleted_page_is_reused() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("reuse.db");

    {
        let pm = PageManager::create(&path)?;
        let pool = BufferPoolManager::new(pm, Box::new(LruReplacer::new(4)), 4);
        let mut heap = RecordHeap::new(pool.clone());
        for _ in 0..3 {
            let page = pool.new_page()?;
            let page_id = page.read().page_id();
            page.write().add_record(b"occupied page")?;
            pool.unpin_page(page_id, true)?;
        }
        heap.insert(b"keeps a page busy")?;
        pool.delete_page(PageId(1))?;
        pool.flush_all()?;
    }

    let mut pm = PageManager::open(&path)?;
    assert_eq!(pm.free_page_ids(), vec![PageId(1)]);
    let reused = pm.get_free_or_allocate()?;
    assert_eq!(reused.page_id(), PageId(1));
    assert_eq!(pm.get_free_or_allocate()?.page_id(), PageId(4));
    Ok(())
}

#[test]
fn test_concurrent_heap_readers() -> Result<()> {
    let pm = PageManager::in_memory();
    let pool = BufferPoolManager::new(pm, Box::new(LruReplacer::new(8)), 8);
    let mut heap = RecordHeap::new(pool.clone());

    let rids: Vec<RecordId> = (0..500u32)
        .map(|i| heap.insert(format!("value-{:04}", i).as_bytes()))
        .collect::<Result<_, _>>()?;
    let heap = Arc::new(heap);
    let rids = Arc::new(rids);

    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            let heap = Arc::clone(&heap);
            let rids = Arc::clone(&rids);
            thread::spawn(move || -> Result<()> {
                for (i, rid) in rids.iter().enumerate().skip(t).step_by(4) {
                    let data = heap.get(*rid)?;
                    assert_eq!(data, Some(format!("value-{:04}", i).into_bytes()));
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap()?;
    }
    assert_eq!(pool.evictable_count() + pool.free_frame_count(), 8);
    Ok(())
}
