//! Buffer frame - a slot in the buffer pool that holds a page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use quarry_common::{PageId, PAGE_SIZE};

/// Shared-latch handle on a frame's page buffer, held by read guards.
pub(crate) type PageDataReadLatch = ArcRwLockReadGuard<RawRwLock, Box<[u8]>>;

/// Exclusive-latch handle on a frame's page buffer, held by write guards.
pub(crate) type PageDataWriteLatch = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Frame identifier - index into the buffer pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for FrameId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

impl From<FrameId> for usize {
    fn from(id: FrameId) -> Self {
        id.0
    }
}

/// A buffer frame holds a single page in memory.
///
/// Each frame pairs a [`PAGE_SIZE`] byte buffer with its bookkeeping
/// metadata: the resident page id, a pin count, and the dirty flag. The
/// metadata lives in atomics so readers never contend with the buffer latch;
/// all *mutations* of the metadata happen under the pool latch.
///
/// The buffer itself sits behind a reader/writer latch. Page guards hold
/// that latch for their lifetime; the pool takes it briefly for disk I/O.
pub struct PageFrame {
    /// Frame ID (index in the frame array).
    frame_id: FrameId,
    /// Page data buffer behind the per-page latch.
    data: Arc<RwLock<Box<[u8]>>>,
    /// Page ID resident in this frame (INVALID if free).
    page_id: AtomicU32,
    /// Number of active borrowers.
    pin_count: AtomicU32,
    /// Whether the page was modified since it was last written to disk.
    dirty: AtomicBool,
}

impl PageFrame {
    /// Creates a new empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID resident in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Binds the frame to a page id.
    #[inline]
    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned frame with pin_count == 0");
        old - 1
    }

    /// Overwrites the pin count.
    #[inline]
    pub(crate) fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::Release);
    }

    /// Returns true if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Takes the page latch shared and returns the buffer.
    #[inline]
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Takes the page latch exclusive and returns the buffer.
    ///
    /// Does not touch the dirty flag; callers that modify the buffer are
    /// responsible for unpinning with `is_dirty = true` (or going through a
    /// write guard, which tracks it).
    #[inline]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Takes the page latch shared with an owned (`Arc`-backed) guard.
    #[inline]
    pub(crate) fn latch_read(&self) -> PageDataReadLatch {
        self.data.read_arc()
    }

    /// Takes the page latch exclusive with an owned (`Arc`-backed) guard.
    #[inline]
    pub(crate) fn latch_write(&self) -> PageDataWriteLatch {
        self.data.write_arc()
    }

    /// Resets the frame to the free state, zeroing the buffer.
    pub(crate) fn reset(&self) {
        self.data.write().fill(0);
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
