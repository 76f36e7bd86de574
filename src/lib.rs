//! Oxbow - a disk-oriented storage engine core in Rust
//!
//! This crate provides the storage heart of a teaching database: a buffer
//! pool that mediates access to fixed-size disk pages, and a concurrent
//! B+tree index built on top of it.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Disk I/O and on-disk page formats
//!   - `DiskManager`: Reads and writes pages of the database file
//!   - `DiskScheduler`: Background-thread disk I/O scheduling
//!   - `LeafPage`/`InternalPage`: B+tree node layouts
//!   - `HeaderPage`: Index name to root page id records
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Caches pages in a fixed array of frames
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and page bytes
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pin-and-latch guards
//!
//! - **Container** (`container`): The extendible hash directory used as the
//!   buffer pool's page table
//!
//! - **Index** (`index`): The latch-crabbing B+tree and its iterator
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oxbow::buffer::BufferPoolManager;
//! use oxbow::common::{PageId, RecordId, SlotId};
//! use oxbow::index::{BPlusTree, UnsignedComparator};
//! use oxbow::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, UnsignedComparator, 64, 64);
//! tree.insert(42, RecordId::new(PageId::new(7), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(42).unwrap().is_some());
//!
//! for entry in tree.begin().unwrap() {
//!     let (key, rid) = entry.unwrap();
//!     println!("{key} -> {rid}");
//! }
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{OxbowError, PageId, RecordId, Result, SlotId};
