//! Record identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PageId;

/// Locates a record on disk: the page it lives on and its slot within that
/// page.
///
/// The B+tree stores `RecordId`s as its values, and the lock manager keys
/// row-level lock queues by them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    page_id: PageId,
    slot: u32,
}

impl RecordId {
    /// Invalid record ID, used as a sentinel value.
    pub const INVALID: Self = Self {
        page_id: PageId::INVALID,
        slot: u32::MAX,
    };

    /// Creates a new `RecordId`.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns the page this record lives on.
    #[inline]
    #[must_use]
    pub const fn page_id(self) -> PageId {
        self.page_id
    }

    /// Returns the slot number within the page.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Checks if this is a valid record ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.page_id.is_valid()
    }

    /// Creates a RecordId from bytes (little-endian, as laid out on pages).
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        let page_id = PageId::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let slot = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self { page_id, slot }
    }

    /// Converts to bytes (little-endian, as laid out on pages).
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.slot.to_le_bytes());
        bytes
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}, {})", self.page_id, self.slot)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}
