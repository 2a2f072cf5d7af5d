use thiserror::Error;

use super::types::PageId;

/// Storage-engine error types
#[derive(Error, Debug)]
pub enum CortenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool exhausted: no free frame and no evictable page")]
    PoolExhausted,

    #[error("page {0} not found")]
    PageNotFound(PageId),

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("disk scheduler error: {0}")]
    DiskScheduler(String),
}

pub type Result<T> = std::result::Result<T, CortenError>;
