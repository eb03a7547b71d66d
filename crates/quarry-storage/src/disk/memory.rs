//! In-memory disk manager.

use std::collections::HashMap;
use std::io;

use parking_lot::Mutex;
use quarry_common::{PageId, PAGE_SIZE};

use super::DiskManager;

/// Disk manager that keeps pages in a map instead of a file.
///
/// Used by unit tests and ephemeral databases. Semantics match
/// [`super::FileDiskManager`]: unwritten pages read as zeros.
#[derive(Default)]
pub struct MemoryDiskManager {
    pages: Mutex<HashMap<PageId, Vec<u8>>>,
}

impl MemoryDiskManager {
    /// Creates an empty in-memory disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pages that have been written.
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        match self.pages.lock().get(&page_id) {
            Some(page) => buf.copy_from_slice(page),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.pages.lock().insert(page_id, buf.to_vec());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDiskManager")
            .field("pages", &self.page_count())
            .finish()
    }
}
