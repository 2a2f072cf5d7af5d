use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::{
    CortenError, FrameId, PageId, Result, DEFAULT_BUCKET_SIZE, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State shared between the manager and outstanding page guards.
///
/// The free-list mutex doubles as the coarse pool latch: every structural
/// pool operation runs under it, with the page-table and replacer mutexes
/// nesting strictly below.
pub(crate) struct PoolCore {
    frames: Vec<Arc<FrameHeader>>,
    latch: Mutex<VecDeque<FrameId>>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
}

impl PoolCore {
    /// Gives back one pin on `page_id`. Returns false when the page is not
    /// resident or its pin count is already zero (a caller bug). The dirty
    /// flag is sticky: true here can never wash an earlier true away.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _pool = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        match frame.unpin() {
            None => false,
            Some(remaining) => {
                if is_dirty {
                    frame.set_dirty(true);
                }
                if remaining == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                true
            }
        }
    }
}

/// BufferPoolManager mediates all access to disk pages through a fixed set
/// of in-memory frames. It keeps at most one copy of any page resident,
/// tracks pins through RAII guards, evicts with an LRU-K policy, and writes
/// dirty pages back on eviction or explicit flush. The page directory is an
/// extendible hash table from page id to frame id.
pub struct BufferPoolManager {
    pool_size: usize,
    core: Arc<PoolCore>,
    disk_scheduler: DiskScheduler,
    /// Next page id to hand out; page 0 is reserved for the header page
    next_page_id: AtomicU32,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames with LRU-`replacer_k` eviction
    /// over the given disk manager.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            core: Arc::new(PoolCore {
                frames,
                latch: Mutex::new(free_list),
                page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
                replacer: LruKReplacer::new(replacer_k, pool_size),
            }),
            disk_scheduler: DiskScheduler::new(disk_manager),
            next_page_id: AtomicU32::new(1),
        }
    }

    /// Allocates a fresh page id and returns it pinned in a zeroed frame,
    /// ready for writing. Fails with `PoolExhausted` when every frame is
    /// pinned.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let core = &self.core;
        let mut free_list = core.latch.lock();

        let frame_id = self.acquire_frame(&mut free_list)?;
        let page_id = PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst));

        let frame = &core.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();

        core.page_table.insert(page_id, frame_id);
        core.replacer.record_access(frame_id);
        core.replacer.set_evictable(frame_id, false);

        drop(free_list);
        let frame = Arc::clone(&core.frames[frame_id.as_usize()]);
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(core)) })
    }

    /// Pins `page_id` for shared read access, loading it from disk if it is
    /// not resident.
    pub fn read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(CortenError::InvalidPageId(page_id));
        }
        let frame_id = self.pin_page(page_id)?;
        let frame = Arc::clone(&self.core.frames[frame_id.as_usize()]);
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.core)) })
    }

    /// Pins `page_id` for exclusive write access, loading it from disk if it
    /// is not resident.
    pub fn write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        if page_id == INVALID_PAGE_ID {
            return Err(CortenError::InvalidPageId(page_id));
        }
        let frame_id = self.pin_page(page_id)?;
        let frame = Arc::clone(&self.core.frames[frame_id.as_usize()]);
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.core)) })
    }

    /// Explicit unpin for callers that track pins themselves; guards call
    /// this on drop.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.core.unpin_page(page_id, is_dirty)
    }

    /// Writes the current contents of `page_id` to disk, resident or not
    /// dirty notwithstanding, and clears the dirty flag. Returns false for
    /// invalid or non-resident pages.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }
        let _pool = self.core.latch.lock();

        let Some(frame_id) = self.core.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.core.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident dirty page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _pool = self.core.latch.lock();

        for frame in &self.core.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Drops `page_id` from the pool and deallocates it on disk. A page that
    /// was never resident counts as deleted; a pinned page cannot be deleted
    /// and yields false.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free_list = self.core.latch.lock();

        let Some(frame_id) = self.core.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.core.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        self.core.page_table.remove(&page_id);
        self.core.replacer.remove(frame_id);
        frame.reset();
        free_list.push_back(frame_id);

        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    /// Current pin count of a resident page, None when not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _pool = self.core.latch.lock();
        self.core
            .page_table
            .find(&page_id)
            .map(|frame_id| self.core.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.core.latch.lock().len()
    }

    /// Pins an already-resident page or loads it into a freshly acquired
    /// frame. Returns the frame holding the page, pinned and non-evictable.
    fn pin_page(&self, page_id: PageId) -> Result<FrameId> {
        let core = &self.core;
        let mut free_list = core.latch.lock();

        if let Some(frame_id) = core.page_table.find(&page_id) {
            let frame = &core.frames[frame_id.as_usize()];
            frame.pin();
            core.replacer.record_access(frame_id);
            core.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &core.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        core.page_table.insert(page_id, frame_id);
        core.replacer.record_access(frame_id);
        core.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Produces an empty frame: pops the free list, or evicts the LRU-K
    /// victim, writing it back first when dirty. Must run under the pool
    /// latch, which the caller passes in as the locked free list.
    fn acquire_frame(&self, free_list: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.core.replacer.evict() else {
            warn!("buffer pool exhausted: {} frames, all pinned", self.pool_size);
            return Err(CortenError::PoolExhausted);
        };

        let frame = &self.core.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        debug!("evicting {} from {}", old_page_id, frame_id);

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
        }

        self.core.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (BufferPoolManager::new(pool_size, 2, dm), temp_file)
    }

    #[test]
    fn test_new_pool_is_all_free() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        // Page 0 is the reserved header page.
        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(bpm.get_pin_count(guard.page_id()), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        let page_id = guard.page_id();
        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_write_then_read_back() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
            guard.page_id()
        };

        let guard = bpm.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_unpin_page_contract() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        drop(guard);

        // Guard already returned the pin.
        assert!(!bpm.unpin_page(page_id, false));
        // Never-resident page.
        assert!(!bpm.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (bpm, _temp) = create_bpm(2);

        let _g1 = bpm.new_page().unwrap();
        let _g2 = bpm.new_page().unwrap();
        assert!(matches!(bpm.new_page(), Err(CortenError::PoolExhausted)));
    }

    #[test]
    fn test_eviction_reclaims_unpinned_frame() {
        let (bpm, _temp) = create_bpm(2);

        let g1 = bpm.new_page().unwrap();
        let p1 = g1.page_id();
        let _g2 = bpm.new_page().unwrap();

        drop(g1);
        let g3 = bpm.new_page().unwrap();
        assert_ne!(g3.page_id(), p1);
        // p1 was evicted and is no longer resident.
        assert_eq!(bpm.get_pin_count(p1), None);
    }

    #[test]
    fn test_flush_persists_across_pools() {
        let (bpm, temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.page_id()
        };
        assert!(bpm.flush_page(page_id).unwrap());
        drop(bpm);

        let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
        let bpm2 = BufferPoolManager::new(10, 2, dm);
        let guard = bpm2.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_flush_non_resident_page() {
        let (bpm, _temp) = create_bpm(10);
        assert!(!bpm.flush_page(PageId::new(500)).unwrap());
        assert!(!bpm.flush_page(INVALID_PAGE_ID).unwrap());
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();

        // Pinned pages cannot be deleted.
        assert!(!bpm.delete_page(page_id).unwrap());
        drop(guard);

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting a page that was never resident is vacuously true.
        assert!(bpm.delete_page(PageId::new(777)).unwrap());
    }
}
