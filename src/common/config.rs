use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Reserved page that stores `(index name, root page id)` records
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for the LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default bucket capacity for the extendible hash directory
pub const DEFAULT_BUCKET_SIZE: usize = 8;

/// Upper bound on the extendible hash directory's global depth. Reaching it
/// means the hash function is degenerate; the table panics rather than loop.
pub const MAX_GLOBAL_DEPTH: usize = 60;
