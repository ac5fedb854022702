//! Storage layer for pagerdb.
//!
//! Data lives in a flat file of fixed-size pages addressed by id. Key
//! components:
//!
//! - **Page**: 8KB slotted page holding variable-length records
//! - **PageManager**: reads and writes pages at `id * PAGE_SIZE` and tracks
//!   which pages are free for reuse
//! - **BufferPoolManager**: fixed set of frames caching pages, with LRU or
//!   clock replacement

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::config::{BufferPoolConfig, ReplacerKind};
pub use buffer::{BufferPoolManager, PageGuard, PageRef};
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{PAGE_SIZE, PageId, RecordId, SlotId, SlottedPage};
