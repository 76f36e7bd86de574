use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{FrameId, OxbowError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// State shared with the release callbacks of outstanding page guards.
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Pool-wide latch. It owns the free list and is held for the duration
    /// of every public operation, including across disk I/O - the simple
    /// trade-off this pool makes for correctness.
    pool_latch: Mutex<VecDeque<FrameId>>,
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
    /// Background disk I/O
    disk_scheduler: DiskScheduler,
}

impl BufferPoolState {
    /// Shared unpin path for the public operation and the guard callbacks.
    fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _pool = self.pool_latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];

        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            Some(0) => {
                self.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
            None => false,
        }
    }
}

/// BufferPoolManager mediates access to fixed-size disk pages through a
/// fixed array of in-memory frames.
///
/// Residency is tracked by an extendible hash page table; victims are chosen
/// by an LRU-K replacer. Callers receive RAII guards that pin the page and
/// hold its page latch; dropping a guard unpins and, once the pin count
/// reaches zero, makes the frame evictable again.
///
/// Latch order is pool latch, then page table latch, then replacer latch.
/// Page latches are only ever acquired after the pool latch is released, so
/// a guard blocking on a busy page never stalls the pool.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames over `disk_manager`, using LRU-K
    /// replacement with the given `k`.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            pool_latch: Mutex::new(free_list),
            page_table: ExtendibleHashTable::new(crate::common::DEFAULT_BUCKET_SIZE),
            replacer: LruKReplacer::new(k, pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, state }
    }

    /// Allocates a fresh page and returns it pinned (pin count 1) behind a
    /// write guard, zero-filled and marked non-evictable.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let (page_id, frame) = {
            let mut free_list = self.state.pool_latch.lock();
            let frame_id = self.acquire_frame(&mut free_list)?;
            let page_id = self.state.disk_scheduler.disk_manager().allocate_page()?;

            let frame = &self.state.frames[frame_id.as_usize()];
            frame.reset();
            frame.set_page_id(page_id);
            frame.pin();

            self.state.page_table.insert(page_id, frame_id)?;
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);

            (page_id, Arc::clone(frame))
        };
        Ok(self.make_write_guard(page_id, frame))
    }

    /// Fetches a page for shared access, reading it from disk on a miss.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(self.make_read_guard(page_id, frame))
    }

    /// Fetches a page for exclusive access, reading it from disk on a miss.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.pin_page(page_id)?;
        Ok(self.make_write_guard(page_id, frame))
    }

    /// Drops one pin on `page_id`, ORing in the dirty hint. Returns false if
    /// the page is not resident or its pin count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes `page_id` back to disk and clears its dirty flag. Returns
    /// false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _pool = self.state.pool_latch.lock();

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);

        Ok(true)
    }

    /// Writes every resident dirty page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _pool = self.state.pool_latch.lock();

        for frame in &self.state.frames {
            let page_id = frame.page_id();
            if page_id != INVALID_PAGE_ID && frame.is_dirty() {
                let mut data = [0u8; PAGE_SIZE];
                frame.copy_to(&mut data);
                self.state.disk_scheduler.schedule_write_sync(page_id, &data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Removes a page from the pool and releases its id back to the disk
    /// manager. Succeeds trivially when the page is not resident; fails
    /// (returns false) only when the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free_list = self.state.pool_latch.lock();

        let Some(frame_id) = self.state.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.state.frames[frame_id.as_usize()];

        if frame.pin_count() > 0 {
            return Ok(false);
        }

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.state.disk_scheduler.schedule_write_sync(page_id, &data)?;
        }

        self.state.page_table.remove(&page_id);
        self.state.replacer.remove(frame_id)?;
        frame.reset();
        free_list.push_back(frame_id);
        self.state
            .disk_scheduler
            .disk_manager()
            .deallocate_page(page_id)?;

        debug!(page_id = %page_id, "deleted page from buffer pool");
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _pool = self.state.pool_latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames on the free list.
    pub fn free_frame_count(&self) -> usize {
        self.state.pool_latch.lock().len()
    }

    /// Pins `page_id` into a frame, reading from disk if it is not resident.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if page_id == INVALID_PAGE_ID {
            return Err(OxbowError::InvalidPageId(page_id));
        }

        let mut free_list = self.state.pool_latch.lock();

        if let Some(frame_id) = self.state.page_table.find(&page_id) {
            let frame = &self.state.frames[frame_id.as_usize()];
            frame.pin();
            self.state.replacer.record_access(frame_id);
            self.state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &self.state.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.state.disk_scheduler.schedule_read_sync(page_id, &mut data)?;

        frame.set_page_id(page_id);
        frame.copy_from(&data);
        frame.set_dirty(false);
        frame.pin();

        self.state.page_table.insert(page_id, frame_id)?;
        self.state.replacer.record_access(frame_id);
        self.state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Finds a frame for a new resident page: the free list first, then the
    /// replacer. A dirty victim is written back before its slot is reused.
    fn acquire_frame(&self, free_list: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            return Err(OxbowError::BufferPoolFull);
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            trace!(page_id = %old_page_id, frame_id = %frame_id, "writing back dirty victim");
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.state
                .disk_scheduler
                .schedule_write_sync(old_page_id, &data)?;
        }

        self.state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }

    fn make_read_guard(&self, page_id: PageId, frame: Arc<FrameHeader>) -> ReadPageGuard {
        let state = Arc::clone(&self.state);
        unsafe {
            ReadPageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        }
    }

    fn make_write_guard(&self, page_id: PageId, frame: Arc<FrameHeader>) -> WritePageGuard {
        let state = Arc::clone(&self.state);
        unsafe {
            WritePageGuard::new(
                page_id,
                frame,
                Box::new(move |pid, is_dirty| {
                    state.unpin(pid, is_dirty);
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_new_pool() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_read_write_round_trip() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
            guard.page_id()
        };

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
        assert_eq!(guard.data()[100], 255);
    }

    #[test]
    fn test_unpin_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let guard = bpm.new_page().unwrap();
            guard.page_id()
        };

        // The guard already unpinned it; a second unpin must fail.
        assert!(!bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(PageId::new(9999), false));
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
        let guard = bpm2.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 42);
    }

    #[test]
    fn test_flush_unknown_page() {
        let (bpm, _temp) = create_bpm(10);
        assert!(!bpm.flush_page(PageId::new(123)).unwrap());
    }

    #[test]
    fn test_eviction_reuses_frames() {
        let (bpm, _temp) = create_bpm(3);

        let mut page_ids = Vec::new();
        for i in 0..3u8 {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = i;
            page_ids.push(guard.page_id());
        }
        assert_eq!(bpm.free_frame_count(), 0);

        // All guards dropped, so a fourth page evicts one of the three.
        let guard = bpm.new_page().unwrap();
        assert!(!page_ids.contains(&guard.page_id()));
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let (bpm, _temp) = create_bpm(2);

        let _g1 = bpm.new_page().unwrap();
        let _g2 = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(OxbowError::BufferPoolFull)));
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let guard = bpm.new_page().unwrap();
            let id = guard.page_id();
            // Pinned pages cannot be deleted.
            assert!(!bpm.delete_page(id).unwrap());
            id
        };

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting a non-resident page succeeds trivially.
        assert!(bpm.delete_page(PageId::new(4321)).unwrap());
    }

    #[test]
    fn test_dirty_page_survives_eviction() {
        let (bpm, _temp) = create_bpm(1);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[17] = 99;
            guard.page_id()
        };

        // Force the only frame to turn over.
        let other = bpm.new_page().unwrap();
        assert_ne!(other.page_id(), page_id);
        drop(other);

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[17], 99);
    }
}
