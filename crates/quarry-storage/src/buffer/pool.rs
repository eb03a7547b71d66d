//! Buffer pool manager.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_common::PageId;
use tracing::{debug, trace};

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::{FrameId, PageFrame};
use super::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use super::replacer::LruKReplacer;
use super::BufferPoolStats;
use crate::disk::DiskManager;

/// Bookkeeping protected by the single pool latch.
struct PoolState {
    /// Maps resident page ids to the frame holding them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not bound to any page.
    free_list: VecDeque<FrameId>,
    /// Eviction policy over occupied frames.
    replacer: LruKReplacer,
    /// Next page id to hand out.
    next_page_id: u32,
}

/// Fixed-capacity cache of disk pages.
///
/// A page enters the pool pinned; while its pin count is above zero it is
/// never evicted. Unpinning to zero hands the frame to the LRU-K replacer.
/// Dirty pages are written back when they are evicted or explicitly flushed.
///
/// Every operation below is serialized by one internal latch, so the
/// individual steps (page-table update, pin, replacer bookkeeping) are
/// atomic with respect to each other.
pub struct BufferPoolManager {
    config: BufferPoolConfig,
    frames: Vec<Arc<PageFrame>>,
    state: Mutex<PoolState>,
    disk: Arc<dyn DiskManager>,
    fetch_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    writeback_count: AtomicU64,
}

impl BufferPoolManager {
    /// Creates a buffer pool over the given disk manager capability.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> BufferResult<Self> {
        config.validate().map_err(BufferError::config)?;
        debug!(
            pool_size = config.pool_size,
            replacer_k = config.replacer_k,
            "creating buffer pool"
        );

        let pool_size = config.pool_size;
        let frames: Vec<Arc<PageFrame>> = (0..pool_size)
            .map(|i| Arc::new(PageFrame::new(FrameId::new(i))))
            .collect();
        let free_list: VecDeque<FrameId> = (0..pool_size).map(FrameId::new).collect();
        let replacer = LruKReplacer::new(pool_size, config.replacer_k);

        Ok(Self {
            config,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer,
                next_page_id: 0,
            }),
            disk,
            fetch_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            writeback_count: AtomicU64::new(0),
        })
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Allocates a fresh page and pins it in a frame.
    ///
    /// The returned frame is pinned once and marked non-evictable; the new
    /// page's buffer is zeroed. Fails with
    /// [`BufferError::NoFrameAvailable`] when every frame is pinned.
    pub fn new_page(&self) -> BufferResult<(PageId, Arc<PageFrame>)> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = PageId::new(state.next_page_id);
        state.next_page_id += 1;

        let frame = &self.frames[frame_id.index()];
        frame.reset();
        frame.set_page_id(page_id);
        frame.set_pin_count(1);

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        debug!(%page_id, frame_id = frame_id.index(), "allocated new page");
        Ok((page_id, Arc::clone(frame)))
    }

    /// Fetches `page_id` into the pool, pinning it.
    ///
    /// A resident page is pinned again directly; otherwise a frame is
    /// acquired (free list, else eviction) and the page is read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<PageFrame>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            trace!(%page_id, frame_id = frame_id.index(), "fetch hit");
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.index()];
        {
            let mut data = frame.data_mut();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                frame.reset();
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.set_pin_count(1);

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        self.miss_count.fetch_add(1, Ordering::Relaxed);
        trace!(%page_id, frame_id = frame_id.index(), "fetch miss, read from disk");
        Ok(Arc::clone(frame))
    }

    /// Drops one pin on `page_id`, OR-ing in the caller's dirty flag.
    ///
    /// The dirty flag is sticky: unpinning with `is_dirty = false` never
    /// clears it. When the pin count reaches zero the frame becomes
    /// evictable. Returns `false` if the page is not resident or was not
    /// pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        trace!(%page_id, pin_count = frame.pin_count(), "unpinned page");
        true
    }

    /// Writes `page_id` to disk and clears its dirty flag.
    ///
    /// Flushes unconditionally, whether or not the page is dirty. Returns
    /// `Ok(false)` if the page is not resident.
    ///
    /// The page is pinned across the write so it cannot be evicted or
    /// deleted mid-flush; the pool latch is *not* held while waiting for
    /// the page latch.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<bool> {
        let frame = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = Arc::clone(&self.frames[frame_id.index()]);
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            frame
        };

        let result = {
            let data = frame.data();
            self.disk.write_page(page_id, &data)
        };
        if result.is_ok() {
            frame.set_dirty(false);
            self.writeback_count.fetch_add(1, Ordering::Relaxed);
            debug!(%page_id, "flushed page");
        }
        self.unpin_page(page_id, false);
        result?;
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> BufferResult<()> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            // A page may have been evicted since the snapshot; that's fine,
            // eviction already wrote it back if it was dirty.
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes `page_id` from the pool, returning its frame to the free
    /// list.
    ///
    /// Deleting a non-resident page trivially succeeds; deleting a pinned
    /// page fails. The page's history is dropped from the replacer and its
    /// buffer is zeroed.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id.index()];
        if frame.pin_count() != 0 {
            return false;
        }
        frame.reset();
        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);
        debug!(%page_id, frame_id = frame_id.index(), "deleted page");
        true
    }

    // -------------------------------------------------------------------------
    // Guarded variants
    // -------------------------------------------------------------------------

    /// Allocates a fresh page wrapped in a [`BasicPageGuard`].
    pub fn new_page_guarded(&self) -> BufferResult<BasicPageGuard<'_>> {
        let (_, frame) = self.new_page()?;
        Ok(BasicPageGuard::new(self, frame))
    }

    /// Fetches a page wrapped in a [`BasicPageGuard`] (no page latch).
    pub fn fetch_page_basic(&self, page_id: PageId) -> BufferResult<BasicPageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self, frame))
    }

    /// Fetches a page and takes its latch shared.
    pub fn fetch_page_read(&self, page_id: PageId) -> BufferResult<ReadPageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(self, &frame))
    }

    /// Fetches a page and takes its latch exclusive.
    pub fn fetch_page_write(&self, page_id: PageId) -> BufferResult<WritePageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(self, &frame))
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Returns true if `page_id` is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pin count of a resident page, `None` if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|frame_id| self.frames[frame_id.index()].pin_count())
    }

    /// Returns the number of frames the replacer currently considers
    /// evictable.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            fetches: self.fetch_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            writebacks: self.writeback_count.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Picks a frame for a new binding: the free list first, else an
    /// eviction victim (writing it back if dirty).
    fn acquire_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(BufferError::NoFrameAvailable)?;
        let frame = &self.frames[frame_id.index()];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            self.disk.write_page(old_page_id, &frame.data())?;
            frame.set_dirty(false);
            self.writeback_count.fetch_add(1, Ordering::Relaxed);
        }
        state.page_table.remove(&old_page_id);
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        debug!(%old_page_id, frame_id = frame_id.index(), "evicted page");
        Ok(frame_id)
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.config.pool_size)
            .field("resident", &state.page_table.len())
            .field("free", &state.free_list.len())
            .field("evictable", &state.replacer.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemoryDiskManager;

    fn test_pool(frames: usize, k: usize) -> BufferPoolManager {
        BufferPoolManager::new(
            BufferPoolConfig::new(frames).with_replacer_k(k),
            Arc::new(MemoryDiskManager::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_new_page_ids_are_monotonic() {
        let bpm = test_pool(4, 2);
        let (p0, _) = bpm.new_page().unwrap();
        bpm.unpin_page(p0, false);
        let (p1, _) = bpm.new_page().unwrap();
        bpm.unpin_page(p1, false);
        assert_eq!(p0, PageId::new(0));
        assert_eq!(p1, PageId::new(1));
    }

    #[test]
    fn test_no_frame_available_when_all_pinned() {
        let bpm = test_pool(2, 2);
        let (_, _f0) = bpm.new_page().unwrap();
        let (_, _f1) = bpm.new_page().unwrap();

        // Both frames pinned: allocation must fail.
        match bpm.new_page() {
            Err(BufferError::NoFrameAvailable) => {}
            other => panic!("expected NoFrameAvailable, got {other:?}"),
        }
    }

    #[test]
    fn test_unpin_makes_frame_reusable() {
        let bpm = test_pool(1, 2);
        let (p0, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p0, false));

        let (p1, _) = bpm.new_page().unwrap();
        assert_ne!(p0, p1);
        assert!(!bpm.contains(p0));
        assert!(bpm.contains(p1));
    }

    #[test]
    fn test_unpin_protocol_violations_return_false() {
        let bpm = test_pool(2, 2);
        let (p0, _) = bpm.new_page().unwrap();

        assert!(!bpm.unpin_page(PageId::new(99), false));
        assert!(bpm.unpin_page(p0, false));
        // Second unpin: pin count already zero.
        assert!(!bpm.unpin_page(p0, false));
    }

    #[test]
    fn test_dirty_flag_is_sticky() {
        let bpm = test_pool(2, 2);
        let (p0, frame) = bpm.new_page().unwrap();
        frame.data_mut()[0] = 0x42;
        assert!(bpm.unpin_page(p0, true));

        // Pin and unpin clean: the page must still write back on eviction.
        bpm.fetch_page(p0).unwrap();
        assert!(bpm.unpin_page(p0, false));

        let (p1, _) = bpm.new_page().unwrap();
        bpm.unpin_page(p1, false);
        let (p2, _) = bpm.new_page().unwrap();
        bpm.unpin_page(p2, false);

        // p0 was evicted by one of the allocations above; re-read from disk.
        let frame = bpm.fetch_page(p0).unwrap();
        assert_eq!(frame.data()[0], 0x42);
    }

    #[test]
    fn test_delete_page() {
        let bpm = test_pool(2, 2);
        let (p0, _) = bpm.new_page().unwrap();

        // Pinned pages cannot be deleted.
        assert!(!bpm.delete_page(p0));
        bpm.unpin_page(p0, false);
        assert!(bpm.delete_page(p0));
        assert!(!bpm.contains(p0));

        // Deleting a non-resident page trivially succeeds.
        assert!(bpm.delete_page(PageId::new(1234)));
    }

    #[test]
    fn test_flush_clears_dirty() {
        let bpm = test_pool(2, 2);
        let (p0, frame) = bpm.new_page().unwrap();
        frame.data_mut()[0] = 7;
        bpm.unpin_page(p0, true);

        assert!(bpm.flush_page(p0).unwrap());
        let state_dirty = {
            let frame = bpm.fetch_page(p0).unwrap();
            let dirty = frame.is_dirty();
            bpm.unpin_page(p0, false);
            dirty
        };
        assert!(!state_dirty);
        assert!(!bpm.flush_page(PageId::new(777)).unwrap());
    }

    #[test]
    fn test_replacer_size_bounded_by_pool_size() {
        let bpm = test_pool(3, 2);
        let mut pages = Vec::new();
        for _ in 0..3 {
            let (pid, _) = bpm.new_page().unwrap();
            pages.push(pid);
        }
        assert_eq!(bpm.evictable_count(), 0);
        for pid in &pages {
            bpm.unpin_page(*pid, false);
        }
        assert!(bpm.evictable_count() <= bpm.pool_size());
        assert_eq!(bpm.evictable_count(), 3);
    }

    #[test]
    fn test_fetch_same_page_twice_needs_two_unpins() {
        let bpm = test_pool(2, 2);
        let (p0, _) = bpm.new_page().unwrap();
        bpm.fetch_page(p0).unwrap();
        assert_eq!(bpm.pin_count(p0), Some(2));

        bpm.unpin_page(p0, false);
        assert_eq!(bpm.evictable_count(), 0);
        bpm.unpin_page(p0, false);
        assert_eq!(bpm.evictable_count(), 1);
    }
}
