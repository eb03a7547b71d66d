//! File-backed disk manager.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use quarry_common::{PageId, PAGE_SIZE};

use super::{page_offset, DiskManager};

/// Disk manager backed by a single database file.
///
/// Pages are stored back to back at `page_id * PAGE_SIZE`. Reads past the
/// current end of file return zeroed pages, so a freshly allocated page can
/// be fetched before it was ever flushed.
pub struct FileDiskManager {
    file: File,
    path: PathBuf,
}

impl FileDiskManager {
    /// Opens (or creates) the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Self { file, path })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces buffered writes to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = page_offset(page_id);
        let n = self.file.read_at(buf, offset)?;
        if n < buf.len() {
            // Short read: the page lies beyond what has been flushed so far.
            buf[n..].fill(0);
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.file.write_all_at(buf, page_offset(page_id))
    }
}

impl std::fmt::Debug for FileDiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDiskManager")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let dm = FileDiskManager::new(dir.path().join("test.db")).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&[1, 2, 3, 4]);
        dm.write_page(PageId::new(3), &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        dm.read_page(PageId::new(3), &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let dir = tempdir().unwrap();
        let dm = FileDiskManager::new(dir.path().join("test.db")).unwrap();

        let mut out = vec![0xAAu8; PAGE_SIZE];
        dm.read_page(PageId::new(9), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pages_do_not_overlap() {
        let dir = tempdir().unwrap();
        let dm = FileDiskManager::new(dir.path().join("test.db")).unwrap();

        let a = vec![0x11u8; PAGE_SIZE];
        let b = vec![0x22u8; PAGE_SIZE];
        dm.write_page(PageId::new(0), &a).unwrap();
        dm.write_page(PageId::new(1), &b).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        dm.read_page(PageId::new(0), &mut out).unwrap();
        assert_eq!(out, a);
        dm.read_page(PageId::new(1), &mut out).unwrap();
        assert_eq!(out, b);
    }
}
