//! Leaf-chain iterator.

use std::sync::Arc;

use quarry_common::RecordId;
use tracing::error;

use super::leaf::LeafPage;
use crate::buffer::{BufferPoolManager, PageFrame};

/// Iterator over `(key, record_id)` pairs in ascending key order.
///
/// The iterator pins exactly one leaf at a time; advancing past the end of
/// a leaf unpins it and follows the next-leaf pointer. Dropping the
/// iterator releases the current pin.
///
/// The iterator does not hold the tree latch: callers must not run it
/// concurrently with inserts or deletes on the same tree.
pub struct TreeIter {
    bpm: Arc<BufferPoolManager>,
    frame: Option<Arc<PageFrame>>,
    index: usize,
}

impl TreeIter {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, frame: Arc<PageFrame>, index: usize) -> Self {
        Self {
            bpm,
            frame: Some(frame),
            index,
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            frame: None,
            index: 0,
        }
    }
}

impl Iterator for TreeIter {
    type Item = (i64, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frame.as_ref()?;
            let (item, next_page_id) = {
                let data = frame.data();
                let leaf = LeafPage::new(&data);
                if self.index < leaf.size() {
                    (
                        Some((leaf.key_at(self.index), leaf.rid_at(self.index))),
                        None,
                    )
                } else {
                    (None, Some(leaf.next_page_id()))
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(item);
            }

            // Exhausted this leaf: release it and follow the chain.
            let page_id = frame.page_id();
            self.bpm.unpin_page(page_id, false);
            self.frame = None;
            self.index = 0;

            let next_page_id = next_page_id.expect("no item implies a next pointer was read");
            if !next_page_id.is_valid() {
                return None;
            }
            match self.bpm.fetch_page(next_page_id) {
                Ok(frame) => self.frame = Some(frame),
                Err(e) => {
                    // A scan cannot surface errors through Iterator; end it.
                    error!(page_id = %next_page_id, error = %e, "scan aborted");
                    return None;
                }
            }
        }
    }
}

impl Drop for TreeIter {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.bpm.unpin_page(frame.page_id(), false);
        }
    }
}

impl std::fmt::Debug for TreeIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeIter")
            .field("page", &self.frame.as_ref().map(|f| f.page_id()))
            .field("index", &self.index)
            .finish()
    }
}
