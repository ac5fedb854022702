//! Storage layer error types.

use crate::storage::page::{PageId, RecordId};
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record too small: {size} bytes (min: {min})")]
    RecordTooSmall { size: usize, min: usize },

    #[error("Record too large: {size} bytes (max: {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("No room in page: requires {required} bytes but only {available} available")]
    NoRoomInPage { required: usize, available: usize },

    #[error("Invalid record ID: {0}")]
    InvalidRecordId(RecordId),

    #[error("Record {0} has been freed")]
    RecordFreed(RecordId),

    #[error("Record not found in page {0}")]
    RecordNotFound(PageId),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page {0} is not an overflow page")]
    PageIsNotOverflow(PageId),

    #[error("Writing page {page_id} failed: {source}")]
    WritingPageFailed {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },

    #[error("Deleting page {page_id} failed: {source}")]
    DeletingPageFailed {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },

    #[error("Page {0} is not in the buffer pool")]
    PageNotInPool(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Buffer pool exhausted: every frame is pinned")]
    PoolExhausted,

    #[error("Bad page size: expected {expected} bytes, got {actual}")]
    BadPageSize { expected: usize, actual: usize },

    #[error("Page {page_id} is corrupted: {reason}")]
    CorruptedPage { page_id: PageId, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl StorageError {
    /// Size and room errors; the caller can allocate a fresh page and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RecordTooSmall { .. } | Self::RecordTooLarge { .. } | Self::NoRoomInPage { .. }
        )
    }

    /// Returns true for programming-error assertions, as opposed to the
    /// ordinary error taxonomy.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    pub(crate) fn corrupted(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::CorruptedPage {
            page_id,
            reason: reason.into(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(StorageError::NoRoomInPage {
            required: 10,
            available: 4
        }
        .is_recoverable());
        assert!(StorageError::RecordTooSmall { size: 5, min: 8 }.is_recoverable());
        assert!(!StorageError::PoolExhausted.is_recoverable());
        assert!(!StorageError::PageNotFound(PageId(3)).is_recoverable());
    }

    #[test]
    fn test_internal_errors() {
        let err = StorageError::InvariantViolation("free slot missing".to_string());
        assert!(err.is_internal());
        assert!(!err.is_recoverable());
        assert!(!StorageError::PoolExhausted.is_internal());
    }

    #[test]
    fn test_error_messages() {
        let rid = RecordId::new(PageId(2), 7);
        assert_eq!(
            StorageError::RecordFreed(rid).to_string(),
            "Record (2, 7) has been freed"
        );
        assert_eq!(
            StorageError::BadPageSize {
                expected: 8192,
                actual: 100
            }
            .to_string(),
            "Bad page size: expected 8192 bytes, got 100"
        );
    }
}
