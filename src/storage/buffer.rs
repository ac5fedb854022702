pub mod clock;
pub mod config;
pub mod lru;
pub mod replacer;

use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, SlottedPage};
use config::BufferPoolConfig;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Shared handle to a page cached in a frame.
///
/// The handle stays valid after the page is unpinned, but only a pinned
/// handle is guaranteed to be the copy the pool will write back.
pub type PageRef = Arc<RwLock<SlottedPage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    Free,
    /// Reserved for a page whose bytes are being read in
    Loading,
    Resident,
}

#[derive(Debug)]
struct Frame {
    status: FrameStatus,
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
    page: PageRef,
}

impl Frame {
    fn new() -> Self {
        Self {
            status: FrameStatus::Free,
            page_id: None,
            pin_count: 0,
            is_dirty: false,
            page: Arc::new(RwLock::new(SlottedPage::new(PageId(0)))),
        }
    }

    fn reset(&mut self) {
        self.status = FrameStatus::Free;
        self.page_id = None;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// Pool bookkeeping, guarded by one lock that is never held across I/O.
#[derive(Debug)]
struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    /// Pages being written back or deleted without a frame of their own
    in_flight: HashSet<PageId>,
}

enum Lookup {
    Hit(PageRef),
    Busy,
    Miss,
}

impl PoolState {
    fn lookup(&mut self, page_id: PageId) -> Lookup {
        if self.in_flight.contains(&page_id) {
            return Lookup::Busy;
        }
        let Some(&frame_id) = self.page_table.get(&page_id) else {
            return Lookup::Miss;
        };

        let frame = &mut self.frames[frame_id];
        if frame.status == FrameStatus::Loading {
            return Lookup::Busy;
        }
        frame.pin_count += 1;
        self.replacer.pin(frame_id);
        trace!("Buffer hit on page {} (frame {})", page_id, frame_id);
        Lookup::Hit(Arc::clone(&frame.page))
    }

    fn resident_frame(&self, page_id: PageId) -> StorageResult<FrameId> {
        self.page_table
            .get(&page_id)
            .copied()
            .filter(|&frame_id| self.frames[frame_id].status == FrameStatus::Resident)
            .ok_or(StorageError::PageNotInPool(page_id))
    }

    /// Takes a frame off the free list, or detaches a victim from its page.
    fn acquire_frame(&mut self) -> StorageResult<(FrameId, Option<Victim>)> {
        if let Some(frame_id) = self.free_list.pop_front() {
            return Ok((frame_id, None));
        }

        let frame_id = self.replacer.evict().ok_or(StorageError::PoolExhausted)?;
        let frame = &mut self.frames[frame_id];
        let (Some(page_id), FrameStatus::Resident, 0) = (frame.page_id, frame.status, frame.pin_count)
        else {
            return Err(StorageError::InvariantViolation(format!(
                "replacer chose frame {} which is not an unpinned resident page",
                frame_id
            )));
        };

        self.page_table.remove(&page_id);
        self.in_flight.insert(page_id);
        debug!("Evicting page {} from frame {}", page_id, frame_id);

        Ok((
            frame_id,
            Some(Victim {
                page_id,
                page: Arc::clone(&frame.page),
                is_dirty: frame.is_dirty,
            }),
        ))
    }

    /// Puts a victim back in its frame after its write-back failed.
    fn restore_victim(&mut self, frame_id: FrameId, victim: Victim) {
        self.in_flight.remove(&victim.page_id);
        self.page_table.insert(victim.page_id, frame_id);

        let frame = &mut self.frames[frame_id];
        frame.status = FrameStatus::Resident;
        frame.page_id = Some(victim.page_id);
        frame.pin_count = 0;
        frame.is_dirty = true;
        frame.page = victim.page;
        self.replacer.unpin(frame_id);
    }

    fn release_frame(&mut self, frame_id: FrameId) {
        self.frames[frame_id].reset();
        self.free_list.push_back(frame_id);
    }
}

struct Victim {
    page_id: PageId,
    page: PageRef,
    is_dirty: bool,
}

/// Fixed-capacity page cache in front of a [`PageManager`].
///
/// Callers pin a page with `fetch_page` or `new_page` and must release it
/// with `unpin_page`, or use the RAII [`PageGuard`] returned by
/// `fetch_guarded` and `new_guarded`.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    /// Signalled whenever a page leaves the loading or in-flight state
    io_done: Condvar,
    page_manager: Mutex<PageManager>,
    pool_size: usize,
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let state = PoolState {
            frames: (0..pool_size).map(|_| Frame::new()).collect(),
            page_table: HashMap::with_capacity(pool_size),
            free_list: (0..pool_size).collect(),
            replacer,
            in_flight: HashSet::new(),
        };

        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(state),
                io_done: Condvar::new(),
                page_manager: Mutex::new(page_manager),
                pool_size,
            }),
        }
    }

    pub fn from_config(page_manager: PageManager, config: &BufferPoolConfig) -> StorageResult<Self> {
        config.validate()?;
        debug!(
            "Creating buffer pool with {} frames ({} replacer)",
            config.pool_size, config.replacer
        );
        Ok(Self::new(
            page_manager,
            config.replacer.build(config.pool_size),
            config.pool_size,
        ))
    }

    /// Pins the page, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageRef> {
        let mut state = self.inner.state.lock();
        loop {
            match state.lookup(page_id) {
                Lookup::Hit(page) => return Ok(page),
                Lookup::Busy => self.inner.io_done.wait(&mut state),
                Lookup::Miss => break,
            }
        }

        debug!("Page fault on page {}", page_id);
        self.load_into_frame(state, page_id, false, |pm| pm.read_page(page_id))
    }

    /// Pins a new, empty page with a freshly allocated id. The page is
    /// dirty until it is first written back.
    pub fn new_page(&self) -> StorageResult<PageRef> {
        let page = self.inner.page_manager.lock().allocate_page();
        let page_id = page.page_id();

        let state = self.inner.state.lock();
        self.load_into_frame(state, page_id, true, move |_| Ok(page))
    }

    /// Claims a frame for `page_id` and fills it with `load`. The state lock
    /// is released around the victim write-back and the load.
    fn load_into_frame<F>(
        &self,
        mut state: MutexGuard<'_, PoolState>,
        page_id: PageId,
        is_dirty: bool,
        load: F,
    ) -> StorageResult<PageRef>
    where
        F: FnOnce(&mut PageManager) -> StorageResult<SlottedPage>,
    {
        let (frame_id, victim) = state.acquire_frame()?;
        state.page_table.insert(page_id, frame_id);
        {
            let frame = &mut state.frames[frame_id];
            frame.status = FrameStatus::Loading;
            frame.page_id = Some(page_id);
            frame.pin_count = 0;
            frame.is_dirty = false;
        }

        if let Some(victim) = victim {
            if victim.is_dirty {
                let flushed = MutexGuard::unlocked(&mut state, || self.write_back(&victim.page));
                if let Err(e) = flushed {
                    warn!(
                        "Failed to flush page {} before eviction: {}",
                        victim.page_id, e
                    );
                    state.page_table.remove(&page_id);
                    state.restore_victim(frame_id, victim);
                    self.inner.io_done.notify_all();
                    return Err(e);
                }
            }
            state.in_flight.remove(&victim.page_id);
            self.inner.io_done.notify_all();
        }

        let loaded = MutexGuard::unlocked(&mut state, || load(&mut *self.inner.page_manager.lock()));
        let page = match loaded {
            Ok(page) => page,
            Err(e) => {
                state.page_table.remove(&page_id);
                state.release_frame(frame_id);
                self.inner.io_done.notify_all();
                return Err(e);
            }
        };

        let page = Arc::new(RwLock::new(page));
        let state = &mut *state;
        let frame = &mut state.frames[frame_id];
        frame.status = FrameStatus::Resident;
        frame.pin_count = 1;
        frame.is_dirty = is_dirty;
        frame.page = Arc::clone(&page);
        state.replacer.pin(frame_id);
        self.inner.io_done.notify_all();

        trace!("Installed page {} in frame {}", page_id, frame_id);
        Ok(page)
    }

    fn write_back(&self, page: &PageRef) -> StorageResult<()> {
        let snapshot = page.read().clone();
        self.inner.page_manager.lock().write_page(&snapshot)
    }

    /// Drops one pin on the page and records whether the caller modified it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        let frame_id = state.resident_frame(page_id)?;

        let state = &mut *state;
        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(StorageError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Writes the cached page to disk whether or not it is dirty. The page
    /// stays resident.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        // Pin for the duration of the write so the frame cannot be reused
        let (frame_id, page) = {
            let mut state = self.inner.state.lock();
            let frame_id = state.resident_frame(page_id)?;
            let state = &mut *state;
            let frame = &mut state.frames[frame_id];
            frame.pin_count += 1;
            frame.is_dirty = false;
            state.replacer.pin(frame_id);
            (frame_id, Arc::clone(&frame.page))
        };

        let result = self.write_back(&page);

        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let frame = &mut state.frames[frame_id];
        if result.is_err() {
            frame.is_dirty = true;
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        if result.is_ok() {
            debug!("Flushed page {}", page_id);
        }
        result
    }

    /// Writes back every dirty resident page and syncs the file.
    pub fn flush_all(&self) -> StorageResult<()> {
        let dirty: Vec<PageId> = {
            let state = self.inner.state.lock();
            state
                .frames
                .iter()
                .filter(|f| f.status == FrameStatus::Resident && f.is_dirty)
                .filter_map(|f| f.page_id)
                .collect()
        };

        for page_id in dirty {
            match self.flush_page(page_id) {
                // Evicted, and so written back, since the scan
                Err(StorageError::PageNotInPool(_)) => {}
                other => other?,
            }
        }

        self.inner.page_manager.lock().sync()
    }

    /// Drops the page from the pool and deletes it on disk. Fails with
    /// `PagePinned` while anyone holds a pin.
    pub fn delete_page(&self, page_id: PageId) -> StorageResult<()> {
        {
            let mut state = self.inner.state.lock();
            loop {
                let busy = state.in_flight.contains(&page_id)
                    || state
                        .page_table
                        .get(&page_id)
                        .is_some_and(|&f| state.frames[f].status == FrameStatus::Loading);
                if !busy {
                    break;
                }
                self.inner.io_done.wait(&mut state);
            }

            if let Some(&frame_id) = state.page_table.get(&page_id) {
                if state.frames[frame_id].pin_count > 0 {
                    return Err(StorageError::PagePinned(page_id));
                }
                state.page_table.remove(&page_id);
                state.replacer.pin(frame_id);
                state.release_frame(frame_id);
            }
            state.in_flight.insert(page_id);
        }

        let result = self.inner.page_manager.lock().delete_page(page_id);

        let mut state = self.inner.state.lock();
        state.in_flight.remove(&page_id);
        self.inner.io_done.notify_all();
        if result.is_ok() {
            debug!("Deleted page {} through the buffer pool", page_id);
        }
        result
    }

    /// Pins the page and wraps it in a guard that unpins on drop.
    pub fn fetch_guarded(&self, page_id: PageId) -> StorageResult<PageGuard> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self.clone(), page_id, page))
    }

    pub fn new_guarded(&self) -> StorageResult<PageGuard> {
        let page = self.new_page()?;
        let page_id = page.read().page_id();
        let mut guard = PageGuard::new(self.clone(), page_id, page);
        guard.mark_dirty();
        Ok(guard)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        let frame_id = state.resident_frame(page_id).ok()?;
        Some(state.frames[frame_id].pin_count)
    }

    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.inner.state.lock();
        let frame_id = state.resident_frame(page_id).ok()?;
        Some(state.frames[frame_id].is_dirty)
    }

    /// Ids of the pages currently cached, in ascending order.
    pub fn resident_pages(&self) -> Vec<PageId> {
        let state = self.inner.state.lock();
        let mut pages: Vec<PageId> = state
            .frames
            .iter()
            .filter(|f| f.status == FrameStatus::Resident)
            .filter_map(|f| f.page_id)
            .collect();
        pages.sort();
        pages
    }

    pub fn capacity(&self) -> usize {
        self.inner.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.state.lock().free_list.len()
    }

    /// Number of frames the replacer may currently evict.
    pub fn evictable_count(&self) -> usize {
        self.inner.state.lock().replacer.size()
    }

    /// Runs `f` against the underlying page manager, e.g. for reads that
    /// bypass the cache.
    pub fn with_page_manager<R>(&self, f: impl FnOnce(&mut PageManager) -> R) -> R {
        f(&mut *self.inner.page_manager.lock())
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.inner.pool_size)
            .field("resident", &self.resident_pages().len())
            .finish()
    }
}

/// A pinned page that is unpinned when dropped. Writing through the guard
/// marks the page dirty.
pub struct PageGuard {
    pool: BufferPoolManager,
    page_id: PageId,
    page: PageRef,
    is_dirty: bool,
}

impl PageGuard {
    fn new(pool: BufferPoolManager, page_id: PageId, page: PageRef) -> Self {
        Self {
            pool,
            page_id,
            page,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SlottedPage> {
        self.page.read()
    }

    pub fn write(&mut self) -> RwLockWriteGuard<'_, SlottedPage> {
        self.is_dirty = true;
        self.page.write()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, self.is_dirty) {
            warn!("Failed to unpin page {}: {}", self.page_id, e);
        }
    }
}
