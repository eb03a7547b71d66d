//! LRU-K replacement policy.
//!
//! LRU-K evicts the frame whose backward k-distance is largest, where the
//! backward k-distance is the difference between the current timestamp and
//! the timestamp of the k-th most recent access. A frame with fewer than k
//! recorded accesses has an infinite backward k-distance and is evicted
//! before any frame with a finite one; among several infinite-distance
//! frames, classical LRU breaks the tie.
//!
//! The replacer keeps frames in two lists:
//!
//! - `young`: frames with fewer than k accesses, ordered by most recent
//!   access (newest at the front). Eviction scans it from the back.
//! - `cache`: frames with at least k accesses, ordered by ascending
//!   k-timestamp. Eviction scans it from the front.
//!
//! Timestamps are a logical counter bumped on every recorded access, so the
//! policy is deterministic and independent of wall-clock time.

use std::collections::{HashMap, VecDeque};

use super::frame::FrameId;

/// Per-frame access record.
#[derive(Debug)]
struct LruKNode {
    /// Last k access timestamps, oldest at the front.
    history: VecDeque<u64>,
    /// Timestamp of the k-th most recent access; `None` is +infinity.
    k_timestamp: Option<u64>,
    /// Whether this frame may be chosen as an eviction victim.
    is_evictable: bool,
}

/// Eviction policy engine consulted by the buffer pool.
///
/// The replacer has no latch of its own: the pool serializes every call
/// under its single latch. Unit tests drive it directly from one thread.
pub struct LruKReplacer {
    /// Maximum number of frames the replacer tracks.
    capacity: usize,
    /// History depth.
    k: usize,
    /// Logical clock, bumped on every access.
    current_timestamp: u64,
    /// Number of evictable frames.
    curr_size: usize,
    /// Frame id -> access record.
    node_store: HashMap<FrameId, LruKNode>,
    /// Frames with fewer than k accesses, newest access at the front.
    young: VecDeque<FrameId>,
    /// Frames with at least k accesses, ascending by k-timestamp.
    cache: VecDeque<FrameId>,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `capacity` frames with history
    /// depth `k`.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "history depth k must be at least 1");
        Self {
            capacity,
            k,
            current_timestamp: 0,
            curr_size: 0,
            node_store: HashMap::with_capacity(capacity),
            young: VecDeque::new(),
            cache: VecDeque::new(),
        }
    }

    /// Records an access to `frame_id` at the next logical timestamp.
    ///
    /// A frame seen for the first time starts in the young list (or directly
    /// in the cache list when `k == 1`). A frame reaching its k-th access
    /// migrates from young to cache; further accesses slide the oldest
    /// timestamp out of its history and reposition it within cache.
    pub fn record_access(&mut self, frame_id: FrameId) {
        assert!(
            frame_id.index() < self.capacity,
            "frame id {} out of range for replacer of capacity {}",
            frame_id.index(),
            self.capacity
        );
        self.current_timestamp += 1;
        let ts = self.current_timestamp;

        if !self.node_store.contains_key(&frame_id) {
            let mut node = LruKNode {
                history: VecDeque::from([ts]),
                k_timestamp: None,
                is_evictable: false,
            };
            if node.history.len() >= self.k {
                node.k_timestamp = node.history.front().copied();
                let k_ts = node.k_timestamp;
                self.node_store.insert(frame_id, node);
                self.insert_into_cache(frame_id, k_ts);
            } else {
                self.node_store.insert(frame_id, node);
                self.young.push_front(frame_id);
            }
            return;
        }

        let node = self.node_store.get_mut(&frame_id).unwrap();
        node.history.push_back(ts);

        if node.history.len() == self.k {
            // k-th access: migrate from young to cache.
            node.k_timestamp = node.history.front().copied();
            let k_ts = node.k_timestamp;
            remove_from(&mut self.young, frame_id);
            self.insert_into_cache(frame_id, k_ts);
        } else if node.history.len() > self.k {
            // Slide the window and reposition within cache.
            node.history.pop_front();
            node.k_timestamp = node.history.front().copied();
            let k_ts = node.k_timestamp;
            remove_from(&mut self.cache, frame_id);
            self.insert_into_cache(frame_id, k_ts);
        } else {
            // Still young: move to the front so the list stays in
            // most-recent-access order.
            remove_from(&mut self.young, frame_id);
            self.young.push_front(frame_id);
        }
    }

    /// Toggles whether `frame_id` may be evicted, maintaining the evictable
    /// count. Unknown frames are ignored.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id.index() < self.capacity,
            "frame id {} out of range for replacer of capacity {}",
            frame_id.index(),
            self.capacity
        );
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            if node.is_evictable && !evictable {
                node.is_evictable = false;
                self.curr_size -= 1;
            } else if !node.is_evictable && evictable {
                node.is_evictable = true;
                self.curr_size += 1;
            }
        }
    }

    /// Evicts the frame with the largest backward k-distance, removing its
    /// access history. Returns `None` if no frame is evictable.
    ///
    /// Young frames (infinite distance) are scanned oldest-first; only if
    /// none is evictable does the scan move to the cache list, smallest
    /// k-timestamp first.
    pub fn evict(&mut self) -> Option<FrameId> {
        if let Some(pos) = self
            .young
            .iter()
            .rposition(|fid| self.node_store[fid].is_evictable)
        {
            let fid = self.young.remove(pos).unwrap();
            self.node_store.remove(&fid);
            self.curr_size -= 1;
            return Some(fid);
        }
        if let Some(pos) = self
            .cache
            .iter()
            .position(|fid| self.node_store[fid].is_evictable)
        {
            let fid = self.cache.remove(pos).unwrap();
            self.node_store.remove(&fid);
            self.curr_size -= 1;
            return Some(fid);
        }
        None
    }

    /// Removes `frame_id` and its history regardless of its k-distance.
    ///
    /// Unknown frames are ignored. The frame must be evictable; the pool
    /// only calls this for pages whose pin count already dropped to zero.
    pub fn remove(&mut self, frame_id: FrameId) {
        let Some(node) = self.node_store.get(&frame_id) else {
            return;
        };
        debug_assert!(node.is_evictable, "remove() on a non-evictable frame");
        if !node.is_evictable {
            return;
        }
        if node.k_timestamp.is_some() {
            remove_from(&mut self.cache, frame_id);
        } else {
            remove_from(&mut self.young, frame_id);
        }
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.curr_size
    }

    /// Inserts `frame_id` into the cache list keeping it sorted by
    /// ascending k-timestamp.
    fn insert_into_cache(&mut self, frame_id: FrameId, k_ts: Option<u64>) {
        debug_assert!(k_ts.is_some());
        let pos = self
            .cache
            .iter()
            .position(|fid| self.node_store[fid].k_timestamp > k_ts)
            .unwrap_or(self.cache.len());
        self.cache.insert(pos, frame_id);
    }
}

impl std::fmt::Debug for LruKReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruKReplacer")
            .field("capacity", &self.capacity)
            .field("k", &self.k)
            .field("evictable", &self.curr_size)
            .field("tracked", &self.node_store.len())
            .finish()
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&fid| fid == frame_id) {
        list.remove(pos);
    }
}
