//! Page guards - RAII handles for pinned pages.
//!
//! A guard pairs a pinned page with the cleanup the borrow requires:
//!
//! - [`BasicPageGuard`] unpins on drop, carrying the dirty flag it
//!   accumulated through `data_mut`/`mark_dirty`
//! - [`ReadPageGuard`] additionally holds the per-page latch shared
//! - [`WritePageGuard`] additionally holds the per-page latch exclusive
//!
//! Read and write guards release the page latch *before* the unpin, so a
//! waiter never observes an unpinned-but-latched page. All guards are
//! move-only values; assigning over one drops the previous guard.

use std::sync::Arc;

use quarry_common::PageId;

use super::frame::{PageDataReadLatch, PageDataWriteLatch, PageFrame};
use super::pool::BufferPoolManager;

/// Pinned-page handle without a page latch.
///
/// Byte access goes through [`data`](Self::data) / [`data_mut`](Self::data_mut),
/// which take the page latch only for the duration of the borrow.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: Arc<PageFrame>,
    page_id: PageId,
    dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: Arc<PageFrame>) -> Self {
        let page_id = frame.page_id();
        Self {
            bpm,
            frame,
            page_id,
            dirty: false,
        }
    }

    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Borrows the page bytes shared.
    #[inline]
    pub fn data(&self) -> impl std::ops::Deref<Target = Box<[u8]>> + '_ {
        self.frame.data()
    }

    /// Borrows the page bytes exclusively and marks the page dirty.
    #[inline]
    pub fn data_mut(&mut self) -> impl std::ops::DerefMut<Target = Box<[u8]>> + '_ {
        self.dirty = true;
        self.frame.data_mut()
    }

    /// Marks the page dirty without borrowing the bytes.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for BasicPageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicPageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Pinned-page handle holding the page latch shared.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<PageDataReadLatch>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &PageFrame) -> Self {
        let page_id = frame.page_id();
        let latch = frame.latch_read();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
        }
    }

    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.latch.as_ref().expect("guard not dropped")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.latch.take();
        self.bpm.unpin_page(self.page_id, false);
    }
}

impl std::fmt::Debug for ReadPageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}

/// Pinned-page handle holding the page latch exclusive.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<PageDataWriteLatch>,
    dirty: bool,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &PageFrame) -> Self {
        let page_id = frame.page_id();
        let latch = frame.latch_write();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
            dirty: false,
        }
    }

    /// Returns the guarded page's id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.latch.as_ref().expect("guard not dropped")
    }

    /// Returns the page bytes mutably and marks the page dirty.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        self.latch.as_mut().expect("guard not dropped")
    }

    /// Marks the page dirty without borrowing the bytes.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.latch.take();
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}

impl std::fmt::Debug for WritePageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}
