//! The B+tree proper.

use std::sync::Arc;

use parking_lot::RwLock;
use quarry_common::{PageId, RecordId};
use tracing::{debug, trace, warn};

use super::config::BPlusTreeConfig;
use super::error::{IndexError, IndexResult};
use super::internal::{InternalPage, InternalPageMut};
use super::iter::TreeIter;
use super::leaf::{LeafPage, LeafPageMut};
use super::page::{page_type, write_page_id, HeaderPage, HeaderPageMut, TreePageType, PARENT_ID_OFFSET};
use crate::buffer::{BufferPoolManager, PageFrame};

/// Disk-backed B+tree mapping `i64` keys to [`RecordId`]s.
///
/// All operations go through the buffer pool; nothing about the tree lives
/// in memory except the header page id and the node capacities. A tree-wide
/// reader/writer latch serializes operations: `get`/`iter` take it shared,
/// `insert`/`remove` take it exclusive, so structure changes never race
/// with readers.
pub struct BPlusTree {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    latch: RwLock<()>,
}

impl BPlusTree {
    /// Creates a fresh tree, allocating its header page.
    ///
    /// Call this against a new database: the header page must be the first
    /// allocation so that it lands on a known page id.
    pub fn new(bpm: Arc<BufferPoolManager>, config: BPlusTreeConfig) -> IndexResult<Self> {
        config
            .validate()
            .map_err(|message| IndexError::Config {
                message: message.to_string(),
            })?;

        let (header_page_id, frame) = bpm.new_page()?;
        {
            let mut data = frame.data_mut();
            HeaderPageMut::new(&mut data).set_root_page_id(PageId::INVALID);
        }
        bpm.unpin_page(header_page_id, true);
        debug!(%header_page_id, "created b+tree");

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            latch: RwLock::new(()),
        })
    }

    /// Attaches to an existing tree whose header page is already on disk.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        config: BPlusTreeConfig,
    ) -> IndexResult<Self> {
        config
            .validate()
            .map_err(|message| IndexError::Config {
                message: message.to_string(),
            })?;
        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            latch: RwLock::new(()),
        })
    }

    /// Returns the page id of the header page.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> IndexResult<bool> {
        let _guard = self.latch.read();
        Ok(!self.root_page_id_inner()?.is_valid())
    }

    /// Point lookup. Keys are unique, so the result is at most one record.
    pub fn get(&self, key: i64) -> IndexResult<Option<RecordId>> {
        let _guard = self.latch.read();
        trace!(key, "get");
        if !self.root_page_id_inner()?.is_valid() {
            return Ok(None);
        }
        let frame = self.find_leaf(key)?;
        let result = {
            let data = frame.data();
            LeafPage::new(&data).lookup(key)
        };
        self.bpm.unpin_page(frame.page_id(), false);
        Ok(result)
    }

    /// Inserts `(key, rid)`.
    ///
    /// Returns `false` if the key is already present; the tree is not
    /// modified in that case.
    pub fn insert(&self, key: i64, rid: RecordId) -> IndexResult<bool> {
        let _guard = self.latch.write();
        trace!(key, "insert");
        if !self.root_page_id_inner()?.is_valid() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Removes `key` if present. Removing an absent key is a no-op.
    pub fn remove(&self, key: i64) -> IndexResult<()> {
        let _guard = self.latch.write();
        trace!(key, "remove");
        if !self.root_page_id_inner()?.is_valid() {
            return Ok(());
        }

        let frame = self.find_leaf(key)?;
        let page_id = frame.page_id();
        let removed = {
            let mut data = frame.data_mut();
            LeafPageMut::new(&mut data).remove(key)
        };
        let Some(new_size) = removed else {
            self.bpm.unpin_page(page_id, false);
            return Ok(());
        };

        let (is_root, min_size) = {
            let data = frame.data();
            let leaf = LeafPage::new(&data);
            (!leaf.parent_page_id().is_valid(), leaf.min_size())
        };

        // Pages emptied below cannot be freed while this operation still
        // pins them; collect and free them at the end.
        let mut deletions = Vec::new();
        if !is_root && new_size < min_size {
            self.coalesce_or_redistribute(&frame, &mut deletions)?;
        }
        self.bpm.unpin_page(page_id, true);
        for dead in deletions {
            if !self.bpm.delete_page(dead) {
                warn!(page_id = %dead, "emptied tree page still pinned, not freed");
            }
        }
        Ok(())
    }

    /// Returns an iterator over all entries in ascending key order.
    pub fn iter(&self) -> IndexResult<TreeIter> {
        let _guard = self.latch.read();
        if !self.root_page_id_inner()?.is_valid() {
            return Ok(TreeIter::empty(Arc::clone(&self.bpm)));
        }
        let frame = self.find_leftmost_leaf()?;
        Ok(TreeIter::new(Arc::clone(&self.bpm), frame, 0))
    }

    /// Returns an iterator positioned at the first entry with key `>= key`.
    pub fn iter_from(&self, key: i64) -> IndexResult<TreeIter> {
        let _guard = self.latch.read();
        if !self.root_page_id_inner()?.is_valid() {
            return Ok(TreeIter::empty(Arc::clone(&self.bpm)));
        }
        let frame = self.find_leaf(key)?;
        let index = {
            let data = frame.data();
            LeafPage::new(&data).key_index(key)
        };
        Ok(TreeIter::new(Arc::clone(&self.bpm), frame, index))
    }

    // -------------------------------------------------------------------------
    // Header page
    // -------------------------------------------------------------------------

    fn root_page_id_inner(&self) -> IndexResult<PageId> {
        let frame = self.bpm.fetch_page(self.header_page_id)?;
        let root = {
            let data = frame.data();
            HeaderPage::new(&data).root_page_id()
        };
        self.bpm.unpin_page(self.header_page_id, false);
        Ok(root)
    }

    fn set_root_page_id(&self, root: PageId) -> IndexResult<()> {
        let frame = self.bpm.fetch_page(self.header_page_id)?;
        {
            let mut data = frame.data_mut();
            HeaderPageMut::new(&mut data).set_root_page_id(root);
        }
        self.bpm.unpin_page(self.header_page_id, true);
        debug!(%root, "root page changed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Descent
    // -------------------------------------------------------------------------

    /// Descends to the leaf covering `key`. The returned frame is pinned.
    fn find_leaf(&self, key: i64) -> IndexResult<Arc<PageFrame>> {
        let mut page_id = self.root_page_id_inner()?;
        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let child = {
                let data = frame.data();
                match page_type(&data) {
                    Some(TreePageType::Leaf) => None,
                    Some(TreePageType::Internal) => Some(InternalPage::new(&data).lookup(key)),
                    None => {
                        drop(data);
                        self.bpm.unpin_page(page_id, false);
                        return Err(IndexError::corrupted(page_id, "unknown page type"));
                    }
                }
            };
            match child {
                None => return Ok(frame),
                Some(next) => {
                    self.bpm.unpin_page(page_id, false);
                    page_id = next;
                }
            }
        }
    }

    /// Descends along child 0 to the leftmost leaf. The returned frame is
    /// pinned.
    fn find_leftmost_leaf(&self) -> IndexResult<Arc<PageFrame>> {
        let mut page_id = self.root_page_id_inner()?;
        loop {
            let frame = self.bpm.fetch_page(page_id)?;
            let child = {
                let data = frame.data();
                match page_type(&data) {
                    Some(TreePageType::Leaf) => None,
                    Some(TreePageType::Internal) => Some(InternalPage::new(&data).child_at(0)),
                    None => {
                        drop(data);
                        self.bpm.unpin_page(page_id, false);
                        return Err(IndexError::corrupted(page_id, "unknown page type"));
                    }
                }
            };
            match child {
                None => return Ok(frame),
                Some(next) => {
                    self.bpm.unpin_page(page_id, false);
                    page_id = next;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Insertion
    // -------------------------------------------------------------------------

    fn start_new_tree(&self, key: i64, rid: RecordId) -> IndexResult<()> {
        let (page_id, frame) = self.bpm.new_page()?;
        {
            let mut data = frame.data_mut();
            let mut leaf = LeafPageMut::new(&mut data);
            leaf.init(page_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert(key, rid);
        }
        self.bpm.unpin_page(page_id, true);
        self.set_root_page_id(page_id)?;
        debug!(root = %page_id, "started new tree");
        Ok(())
    }

    fn insert_into_leaf(&self, key: i64, rid: RecordId) -> IndexResult<bool> {
        let frame = self.find_leaf(key)?;
        let page_id = frame.page_id();

        let (inserted, new_size, parent) = {
            let mut data = frame.data_mut();
            let mut leaf = LeafPageMut::new(&mut data);
            let inserted = leaf.insert(key, rid);
            (inserted, leaf.size(), leaf.as_view().parent_page_id())
        };
        if !inserted {
            self.bpm.unpin_page(page_id, false);
            return Ok(false);
        }
        if new_size < self.leaf_max_size {
            self.bpm.unpin_page(page_id, true);
            return Ok(true);
        }

        // The leaf is at capacity: split and push the new sibling's first
        // key into the parent.
        let (right_id, separator) = self.split_leaf(&frame)?;
        self.insert_into_parent(page_id, parent, separator, right_id)?;
        self.bpm.unpin_page(page_id, true);
        Ok(true)
    }

    /// Splits the full leaf in `left_frame`, returning the new right
    /// sibling's id and the separator key to publish upward.
    fn split_leaf(&self, left_frame: &PageFrame) -> IndexResult<(PageId, i64)> {
        let (right_id, right_frame) = self.bpm.new_page()?;
        let separator = {
            let mut left_data = left_frame.data_mut();
            let mut right_data = right_frame.data_mut();
            let mut left = LeafPageMut::new(&mut left_data);
            let mut right = LeafPageMut::new(&mut right_data);
            right.init(right_id, left.as_view().parent_page_id(), self.leaf_max_size);
            left.move_half_to(&mut right);
            right.as_view().key_at(0)
        };
        self.bpm.unpin_page(right_id, true);
        debug!(left = %left_frame.page_id(), right = %right_id, separator, "split leaf");
        Ok((right_id, separator))
    }

    /// Splits the overfull internal page in `left_frame`, returning the new
    /// right sibling's id and the separator key to publish upward.
    fn split_internal(&self, left_frame: &PageFrame) -> IndexResult<(PageId, i64)> {
        let (right_id, right_frame) = self.bpm.new_page()?;
        let separator = {
            let mut left_data = left_frame.data_mut();
            let mut right_data = right_frame.data_mut();
            let mut left = InternalPageMut::new(&mut left_data);
            let mut right = InternalPageMut::new(&mut right_data);
            right.init(
                right_id,
                left.as_view().parent_page_id(),
                self.internal_max_size,
            );
            left.move_half_to(&mut right);
            right.as_view().key_at(0)
        };

        // The moved children now belong to the new sibling.
        let children: Vec<PageId> = {
            let data = right_frame.data();
            let right = InternalPage::new(&data);
            (0..right.size()).map(|i| right.child_at(i)).collect()
        };
        for child in children {
            self.set_parent(child, right_id)?;
        }

        self.bpm.unpin_page(right_id, true);
        debug!(left = %left_frame.page_id(), right = %right_id, separator, "split internal");
        Ok((right_id, separator))
    }

    /// Links a freshly split `(left, right)` pair under their parent,
    /// splitting upward as needed.
    fn insert_into_parent(
        &self,
        left_id: PageId,
        parent_id: PageId,
        key: i64,
        right_id: PageId,
    ) -> IndexResult<()> {
        if !parent_id.is_valid() {
            // `left` was the root: grow the tree by one level.
            let (root_id, root_frame) = self.bpm.new_page()?;
            {
                let mut data = root_frame.data_mut();
                let mut root = InternalPageMut::new(&mut data);
                root.init(root_id, PageId::INVALID, self.internal_max_size);
                root.populate_new_root(left_id, key, right_id);
            }
            self.bpm.unpin_page(root_id, true);
            self.set_parent(left_id, root_id)?;
            self.set_parent(right_id, root_id)?;
            self.set_root_page_id(root_id)?;
            return Ok(());
        }

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let (new_size, grandparent) = {
            let mut data = parent_frame.data_mut();
            let mut parent = InternalPageMut::new(&mut data);
            let new_size = parent.insert_node_after(left_id, key, right_id);
            (new_size, parent.as_view().parent_page_id())
        };
        if new_size > self.internal_max_size {
            let (new_right_id, separator) = self.split_internal(&parent_frame)?;
            self.insert_into_parent(parent_id, grandparent, separator, new_right_id)?;
        }
        self.bpm.unpin_page(parent_id, true);
        Ok(())
    }

    /// Rewrites a node's parent pointer.
    fn set_parent(&self, page_id: PageId, parent: PageId) -> IndexResult<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        {
            let mut data = frame.data_mut();
            write_page_id(&mut data, PARENT_ID_OFFSET, parent);
        }
        self.bpm.unpin_page(page_id, true);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Rebalances the underflowing node in `frame` by borrowing from or
    /// merging with a sibling. The caller keeps the node pinned.
    fn coalesce_or_redistribute(
        &self,
        frame: &Arc<PageFrame>,
        deletions: &mut Vec<PageId>,
    ) -> IndexResult<()> {
        let page_id = frame.page_id();
        let (parent_id, is_leaf, size) = {
            let data = frame.data();
            match page_type(&data) {
                Some(TreePageType::Leaf) => {
                    let v = LeafPage::new(&data);
                    (v.parent_page_id(), true, v.size())
                }
                Some(TreePageType::Internal) => {
                    let v = InternalPage::new(&data);
                    (v.parent_page_id(), false, v.size())
                }
                None => return Err(IndexError::corrupted(page_id, "unknown page type")),
            }
        };

        if !parent_id.is_valid() {
            // The root is exempt from minimum-size rules; an internal root
            // left with a single child hands that child the crown.
            if !is_leaf && size == 1 {
                self.adjust_root(frame, deletions)?;
            }
            return Ok(());
        }

        // Pick a sibling through the parent: the left one, unless this node
        // is the first child.
        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let sibling = {
            let data = parent_frame.data();
            let parent = InternalPage::new(&data);
            parent.child_index(page_id).map(|index| {
                let (sibling_index, sibling_is_right) =
                    if index == 0 { (1, true) } else { (index - 1, false) };
                (parent.child_at(sibling_index), sibling_is_right)
            })
        };
        self.bpm.unpin_page(parent_id, false);
        let Some((sibling_id, sibling_is_right)) = sibling else {
            return Err(IndexError::corrupted(
                parent_id,
                format!("page {page_id} not found among parent's children"),
            ));
        };

        let sibling_frame = self.bpm.fetch_page(sibling_id)?;
        let (sibling_size, min_size) = {
            let data = sibling_frame.data();
            if is_leaf {
                let v = LeafPage::new(&data);
                (v.size(), v.min_size())
            } else {
                let v = InternalPage::new(&data);
                (v.size(), v.min_size())
            }
        };

        if sibling_size > min_size {
            self.redistribute(frame, &sibling_frame, sibling_is_right, parent_id, is_leaf)?;
            self.bpm.unpin_page(sibling_id, true);
        } else {
            // Merge right into left and drop the right node.
            let (left_frame, right_frame): (&Arc<PageFrame>, &Arc<PageFrame>) = if sibling_is_right
            {
                (frame, &sibling_frame)
            } else {
                (&sibling_frame, frame)
            };
            let right_id = right_frame.page_id();
            self.coalesce(left_frame, right_frame, parent_id, is_leaf, deletions)?;
            self.bpm.unpin_page(sibling_id, true);
            deletions.push(right_id);
        }
        Ok(())
    }

    /// Borrows one entry from `sibling` into the underflowing `node` and
    /// refreshes the separator in the parent.
    fn redistribute(
        &self,
        node_frame: &Arc<PageFrame>,
        sibling_frame: &Arc<PageFrame>,
        sibling_is_right: bool,
        parent_id: PageId,
        is_leaf: bool,
    ) -> IndexResult<()> {
        let node_id = node_frame.page_id();
        let sibling_id = sibling_frame.page_id();

        let moved_child = {
            let mut node_data = node_frame.data_mut();
            let mut sibling_data = sibling_frame.data_mut();
            if is_leaf {
                let mut node = LeafPageMut::new(&mut node_data);
                let mut sibling = LeafPageMut::new(&mut sibling_data);
                if sibling_is_right {
                    sibling.move_first_to_end_of(&mut node);
                } else {
                    sibling.move_last_to_front_of(&mut node);
                }
                None
            } else {
                let mut node = InternalPageMut::new(&mut node_data);
                let mut sibling = InternalPageMut::new(&mut sibling_data);
                if sibling_is_right {
                    sibling.move_first_to_end_of(&mut node);
                    Some(node.as_view().child_at(node.size() - 1))
                } else {
                    sibling.move_last_to_front_of(&mut node);
                    Some(node.as_view().child_at(0))
                }
            }
        };
        if let Some(child) = moved_child {
            self.set_parent(child, node_id)?;
        }

        // Whichever node is the right one of the pair publishes its first
        // key as the new separator.
        let (right_id, new_separator) = {
            if sibling_is_right {
                let data = sibling_frame.data();
                let key = if is_leaf {
                    LeafPage::new(&data).key_at(0)
                } else {
                    InternalPage::new(&data).key_at(0)
                };
                (sibling_id, key)
            } else {
                let data = node_frame.data();
                let key = if is_leaf {
                    LeafPage::new(&data).key_at(0)
                } else {
                    InternalPage::new(&data).key_at(0)
                };
                (node_id, key)
            }
        };

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        {
            let mut data = parent_frame.data_mut();
            let mut parent = InternalPageMut::new(&mut data);
            let index = parent
                .as_view()
                .child_index(right_id)
                .expect("right node must be a child of its parent");
            parent.set_key_at(index, new_separator);
        }
        self.bpm.unpin_page(parent_id, true);
        trace!(node = %node_id, sibling = %sibling_id, "redistributed");
        Ok(())
    }

    /// Merges `right` into `left`, removes the separator entry from the
    /// parent, and rebalances the parent if it underflows.
    fn coalesce(
        &self,
        left_frame: &Arc<PageFrame>,
        right_frame: &Arc<PageFrame>,
        parent_id: PageId,
        is_leaf: bool,
        deletions: &mut Vec<PageId>,
    ) -> IndexResult<()> {
        let left_id = left_frame.page_id();
        let right_id = right_frame.page_id();

        let adopted = {
            let mut left_data = left_frame.data_mut();
            let mut right_data = right_frame.data_mut();
            if is_leaf {
                let mut left = LeafPageMut::new(&mut left_data);
                let mut right = LeafPageMut::new(&mut right_data);
                right.move_all_to(&mut left);
                Vec::new()
            } else {
                let mut left = InternalPageMut::new(&mut left_data);
                let mut right = InternalPageMut::new(&mut right_data);
                let first_adopted = left.size();
                right.move_all_to(&mut left);
                let view = left.as_view();
                (first_adopted..view.size()).map(|i| view.child_at(i)).collect()
            }
        };
        for child in adopted {
            self.set_parent(child, left_id)?;
        }

        let parent_frame = self.bpm.fetch_page(parent_id)?;
        let (new_size, min_size) = {
            let mut data = parent_frame.data_mut();
            let mut parent = InternalPageMut::new(&mut data);
            let index = parent
                .as_view()
                .child_index(right_id)
                .expect("merged node must be a child of its parent");
            let new_size = parent.remove_at(index);
            (new_size, parent.as_view().min_size())
        };
        debug!(left = %left_id, right = %right_id, "coalesced");

        if new_size < min_size {
            self.coalesce_or_redistribute(&parent_frame, deletions)?;
        }
        self.bpm.unpin_page(parent_id, true);
        Ok(())
    }

    /// Promotes the single remaining child of the internal root to be the
    /// new root.
    fn adjust_root(
        &self,
        root_frame: &Arc<PageFrame>,
        deletions: &mut Vec<PageId>,
    ) -> IndexResult<()> {
        let old_root_id = root_frame.page_id();
        let child_id = {
            let data = root_frame.data();
            InternalPage::new(&data).child_at(0)
        };
        self.set_parent(child_id, PageId::INVALID)?;
        self.set_root_page_id(child_id)?;
        deletions.push(old_root_id);
        debug!(old_root = %old_root_id, new_root = %child_id, "shrunk tree by one level");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Structural verification
    // -------------------------------------------------------------------------

    /// Walks the whole tree checking its structural invariants: key order,
    /// size bounds, parent pointers, uniform leaf depth, separator bounds,
    /// and the leaf chain. Intended for tests and debugging.
    pub fn verify(&self) -> IndexResult<()> {
        let _guard = self.latch.read();
        let root = self.root_page_id_inner()?;
        if !root.is_valid() {
            return Ok(());
        }
        let mut leaf_depth = None;
        self.verify_node(root, PageId::INVALID, None, None, None, 0, &mut leaf_depth)?;
        self.verify_leaf_chain()
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<i64>,
        upper: Option<i64>,
        expected_mirror: Option<i64>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> IndexResult<()> {
        let frame = self.bpm.fetch_page(page_id)?;
        let is_root = !expected_parent.is_valid();

        enum Checked {
            Leaf,
            Internal(Vec<(PageId, Option<i64>, Option<i64>, Option<i64>)>),
        }

        let checked = {
            let data = frame.data();
            match page_type(&data) {
                Some(TreePageType::Leaf) => {
                    let leaf = LeafPage::new(&data);
                    if leaf.parent_page_id() != expected_parent {
                        return Err(IndexError::corrupted(page_id, "bad parent pointer"));
                    }
                    if !is_root
                        && (leaf.size() < leaf.min_size() || leaf.size() >= leaf.max_size())
                    {
                        return Err(IndexError::corrupted(page_id, "leaf size out of bounds"));
                    }
                    match *leaf_depth {
                        None => *leaf_depth = Some(depth),
                        Some(d) if d != depth => {
                            return Err(IndexError::corrupted(page_id, "leaves at unequal depth"));
                        }
                        _ => {}
                    }
                    for i in 0..leaf.size() {
                        let key = leaf.key_at(i);
                        if i > 0 && leaf.key_at(i - 1) >= key {
                            return Err(IndexError::corrupted(page_id, "keys not increasing"));
                        }
                        if lower.is_some_and(|low| key < low) || upper.is_some_and(|up| key >= up) {
                            return Err(IndexError::corrupted(page_id, "key outside bounds"));
                        }
                    }
                    Checked::Leaf
                }
                Some(TreePageType::Internal) => {
                    let node = InternalPage::new(&data);
                    if node.parent_page_id() != expected_parent {
                        return Err(IndexError::corrupted(page_id, "bad parent pointer"));
                    }
                    if is_root {
                        if node.size() < 2 {
                            return Err(IndexError::corrupted(page_id, "internal root too small"));
                        }
                    } else if node.size() < node.min_size() || node.size() > node.max_size() {
                        return Err(IndexError::corrupted(page_id, "internal size out of bounds"));
                    }
                    if let Some(mirror) = expected_mirror {
                        if node.key_at(0) != mirror {
                            return Err(IndexError::corrupted(
                                page_id,
                                "slot-0 key does not mirror parent separator",
                            ));
                        }
                    }
                    let mut children = Vec::with_capacity(node.size());
                    for i in 0..node.size() {
                        if i > 1 && node.key_at(i - 1) >= node.key_at(i) {
                            return Err(IndexError::corrupted(page_id, "separators not increasing"));
                        }
                        let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                        let child_upper = if i + 1 < node.size() {
                            Some(node.key_at(i + 1))
                        } else {
                            upper
                        };
                        let child_mirror = if i == 0 { None } else { Some(node.key_at(i)) };
                        children.push((node.child_at(i), child_lower, child_upper, child_mirror));
                    }
                    Checked::Internal(children)
                }
                None => return Err(IndexError::corrupted(page_id, "unknown page type")),
            }
        };
        self.bpm.unpin_page(page_id, false);

        if let Checked::Internal(children) = checked {
            for (child, child_lower, child_upper, child_mirror) in children {
                self.verify_node(
                    child,
                    page_id,
                    child_lower,
                    child_upper,
                    child_mirror,
                    depth + 1,
                    leaf_depth,
                )?;
            }
        }
        Ok(())
    }

    /// Walks the leaf chain asserting strictly ascending keys across the
    /// whole key space.
    fn verify_leaf_chain(&self) -> IndexResult<()> {
        let mut frame = self.find_leftmost_leaf()?;
        let mut prev: Option<i64> = None;
        loop {
            let page_id = frame.page_id();
            let next = {
                let data = frame.data();
                let leaf = LeafPage::new(&data);
                for i in 0..leaf.size() {
                    let key = leaf.key_at(i);
                    if prev.is_some_and(|p| p >= key) {
                        return Err(IndexError::corrupted(page_id, "leaf chain out of order"));
                    }
                    prev = Some(key);
                }
                leaf.next_page_id()
            };
            self.bpm.unpin_page(page_id, false);
            if !next.is_valid() {
                return Ok(());
            }
            frame = self.bpm.fetch_page(next)?;
        }
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("header_page_id", &self.header_page_id)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .finish()
    }
}
