//! Corten - storage-engine core for a disk-oriented RDBMS
//!
//! This crate implements the layers that mediate all access to fixed-size
//! disk pages: a buffer pool that caches pages in a fixed set of frames, an
//! LRU-K replacer that picks eviction victims, an extendible hash directory
//! that maps resident page ids to frames, and a concurrent B+Tree index
//! built on top of the pool.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O
//!   - `DiskManager`: reads and writes pages in the database file
//!   - `DiskScheduler`: background worker that serializes disk requests
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: fetches pages into frames and pins them
//!   - `LruKReplacer`: LRU-K eviction policy over the frames
//!   - `FrameHeader`: per-frame metadata, pin count, and page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII pins with latch semantics
//!
//! - **Containers** (`container`): in-memory structures
//!   - `ExtendibleHashTable`: the pool's page directory
//!
//! - **Index** (`index`): ordered access paths
//!   - `BPlusTree`: concurrent B+Tree with latch crabbing
//!   - `BTreeIterator`: leaf-chain range scans
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use corten::buffer::BufferPoolManager;
//! use corten::common::{PageId, RecordId, SlotId};
//! use corten::index::{BPlusTree, IndexKey, IntegerComparator};
//! use corten::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("orders_pk", bpm, IntegerComparator, 64, 64);
//! let rid = RecordId::new(PageId::new(100), SlotId::new(0));
//! tree.insert(&IndexKey::from_u64(42), rid).unwrap();
//! assert_eq!(tree.get_value(&IndexKey::from_u64(42)).unwrap(), Some(rid));
//! ```

pub mod buffer;
pub mod common;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{CortenError, FrameId, PageId, RecordId, Result, SlotId};
