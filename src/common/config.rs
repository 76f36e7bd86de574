/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Page ID of the header page, reserved when a database file is created.
/// It stores one (index name, root page id) record per index.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for the LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default bucket size for the extendible hash directory
pub const DEFAULT_BUCKET_SIZE: usize = 4;

use super::types::PageId;
