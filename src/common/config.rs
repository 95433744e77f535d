use std::time::Duration;

use super::types::{FrameId, PageId, TxnId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Invalid transaction ID constant
pub const INVALID_TXN_ID: TxnId = -1;

/// Page storing the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 16;

/// Bucket capacity of the buffer pool's page table
pub const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// How long the deadlock detector sleeps between scans
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
