use thiserror::Error;

use super::types::PageId;

/// Errors surfaced by the storage core. Every fallible operation in the
/// pager, buffer pool, transaction, and B+tree layers returns this type;
/// I/O errors propagate from the pager up through the caller, never
/// swallowed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("no victim available for eviction")]
    NoVictim,

    #[error("expected page type {expected}, found {found} at page {page_id}")]
    InvalidPageType {
        page_id: PageId,
        expected: u16,
        found: u16,
    },

    #[error("key not found")]
    KeyNotFound,

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
