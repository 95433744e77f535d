use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolState;
use super::FrameHeader;

/// RAII guard for read-only access to a page.
///
/// Holds the page's read latch and a pin on its frame. Dropping the guard
/// releases the latch first and then unpins the page through the pool, so
/// the frame can never be evicted while its latch is live.
pub struct ReadPageGuard {
    page_id: PageId,
    /// Kept alive for the lifetime of the transmuted data guard
    _frame: Arc<FrameHeader>,
    pool: Arc<PoolState>,
    /// Read latch on the page data; released in drop before the unpin
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// Acquires the page's read latch and wraps it.
    ///
    /// The caller must have pinned the frame already; the pin is what keeps
    /// the `'static` transmute sound (the frame outlives the guard via the
    /// Arc, and its identity cannot change while pinned).
    pub(crate) fn new(page_id: PageId, frame: Arc<FrameHeader>, pool: Arc<PoolState>) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(data_guard) };

        Self {
            page_id,
            _frame: frame,
            pool,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch first, then the unpin; a reader never dirties the page.
        self.data_guard.take();
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for read-write access to a page.
///
/// Holds the page's write latch and a pin on its frame. The page is marked
/// dirty on the first mutable access; the dirty bit travels to the pool on
/// drop and is sticky there until a flush.
pub struct WritePageGuard {
    page_id: PageId,
    _frame: Arc<FrameHeader>,
    pool: Arc<PoolState>,
    is_dirty: bool,
    /// Write latch on the page data; released in drop before the unpin
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard {
    /// Acquires the page's write latch and wraps it. Same pinning contract
    /// as [`ReadPageGuard::new`].
    pub(crate) fn new(page_id: PageId, frame: Arc<FrameHeader>, pool: Arc<PoolState>) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(data_guard) };

        Self {
            page_id,
            _frame: frame,
            pool,
            is_dirty: false,
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable reference to the page data and marks the page
    /// dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.pool.unpin_page(self.page_id, self.is_dirty);
    }
}
