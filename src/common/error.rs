use thiserror::Error;

use super::types::{FrameId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum OxbowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Frame {0} is not evictable")]
    FrameNotEvictable(FrameId),

    #[error("Hash directory cannot split further, all keys collide")]
    DirectoryOverflow,

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Header page has no room for another index record")]
    HeaderFull,

    #[error("Index {0} not found")]
    IndexNotFound(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, OxbowError>;
