//! Record-oriented access on top of the buffer pool.
//!
//! - **RecordHeap**: appends records across as many heap pages as needed and
//!   stores oversized records on linked overflow chains

pub mod heap;

pub use heap::RecordHeap;
