use crate::storage::page::PageId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic page id generator owned by a [`PageManager`].
///
/// Ids handed out are never taken back, so an allocated id that is never
/// written simply leaves a gap.
///
/// [`PageManager`]: crate::storage::disk::PageManager
#[derive(Debug, Default)]
pub struct PageIdAllocator {
    next: AtomicU32,
}

impl PageIdAllocator {
    pub fn new(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    pub fn allocate(&self) -> PageId {
        PageId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// The id the next call to `allocate` will return.
    pub fn peek(&self) -> PageId {
        PageId(self.next.load(Ordering::SeqCst))
    }

    /// Makes sure `page_id` is never handed out again.
    pub fn advance_past(&self, page_id: PageId) {
        self.next.fetch_max(page_id.0.saturating_add(1), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_monotonic_allocation() {
        let ids = PageIdAllocator::default();
        assert_eq!(ids.allocate(), PageId(0));
        assert_eq!(ids.allocate(), PageId(1));
        assert_eq!(ids.peek(), PageId(2));
    }

    #[test]
    fn test_advance_past() {
        let ids = PageIdAllocator::new(3);
        ids.advance_past(PageId(1));
        assert_eq!(ids.peek(), PageId(3));

        ids.advance_past(PageId(9));
        assert_eq!(ids.allocate(), PageId(10));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(PageIdAllocator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..100).map(|_| ids.allocate().0).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
