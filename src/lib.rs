//! Keel - the storage and concurrency core of a disk-oriented RDBMS
//!
//! This crate provides the three subsystems that let higher layers (query
//! executors, catalog) read, write, and index tuples under ACID
//! transactions:
//!
//! - **Buffer pool** (`buffer`): a fixed set of frames caching disk pages,
//!   an LRU-K replacer deciding evictions, and RAII page guards that pin
//!   pages and hold their reader/writer latches.
//!   - `BufferPoolManager`: fetches pages from disk and caches them
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `ReadPageGuard`/`WritePageGuard`: scoped, latched page access
//!
//! - **B+ tree index** (`index`): a concurrent ordered index over the
//!   buffer pool with crab-latching, split/borrow/merge maintenance, and a
//!   forward iterator. The header page (page 0) maps index names to root
//!   page ids across restarts.
//!
//! - **Lock manager** (`concurrency`): hierarchical table/row locks in
//!   IS/IX/S/SIX/X modes with isolation-level-aware two-phase locking and a
//!   periodic wait-for-graph deadlock detector.
//!
//! Supporting layers: `storage::disk` (the single-file disk manager the
//! buffer pool reads and writes through) and `container` (the extendible
//! hash table backing the buffer pool's page table).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keel::buffer::BufferPoolManager;
//! use keel::common::{PageId, RecordId, SlotId};
//! use keel::concurrency::{IsolationLevel, Transaction};
//! use keel::index::BPlusTree;
//! use keel::storage::disk::DiskManager;
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let index = BPlusTree::new("orders_pk", Arc::clone(&bpm), 64, 64).unwrap();
//! let txn = Transaction::new(0, IsolationLevel::RepeatableRead);
//!
//! let rid = RecordId::new(PageId::new(10), SlotId::new(0));
//! index.insert(42, rid, &txn).unwrap();
//!
//! let mut result = Vec::new();
//! assert!(index.get_value(42, &mut result, &txn).unwrap());
//! assert_eq!(result, vec![rid]);
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, KeelError, PageId, RecordId, Result, SlotId, TableOid, TxnId};
