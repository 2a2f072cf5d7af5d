use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolCore;
use super::FrameHeader;

/// RAII guard for shared read access to a pinned page. Holds the page latch
/// in read mode; dropping it releases the latch and returns the pin to the
/// buffer pool.
pub struct ReadPageGuard {
    page_id: PageId,
    core: Arc<PoolCore>,
    /// Keeps the frame alive for the transmuted latch guard below
    _frame: Arc<FrameHeader>,
    data: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The latch guard is transmuted to `'static`; the `Arc` on the frame
    /// keeps the lock alive at least as long as the guard.
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<FrameHeader>, core: Arc<PoolCore>) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            core,
            _frame: frame,
            data: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
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
        // Release the latch before giving the pin back so an evictor blocked
        // on the frame can proceed as soon as the unpin lands.
        self.data.take();
        self.core.unpin_page(self.page_id, false);
    }
}

/// RAII guard for exclusive write access to a pinned page. The first call to
/// `data_mut` marks the page dirty; dropping the guard releases the latch and
/// unpins, carrying the dirty bit back to the pool.
pub struct WritePageGuard {
    page_id: PageId,
    core: Arc<PoolCore>,
    _frame: Arc<FrameHeader>,
    data: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    dirtied: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(page_id: PageId, frame: Arc<FrameHeader>, core: Arc<PoolCore>) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            core,
            _frame: frame,
            data: Some(data_guard),
            dirtied: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirtied = true;
        &mut self.data.as_mut().unwrap()[..]
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
        self.data.take();
        self.core.unpin_page(self.page_id, self.dirtied);
    }
}
