//! Disk layer: maps page ids to fixed offsets in a flat page file.

pub mod id_allocator;
pub mod page_manager;
pub mod store;

pub use id_allocator::PageIdAllocator;
pub use page_manager::PageManager;
pub use store::{FileStore, MemoryStore, PageStore};
