//! B+tree index over buffer-pooled pages.
//!
//! The index maps fixed-width `i64` keys to [`RecordId`]s. Keys are unique.
//! All nodes live in disk pages fetched through the buffer pool:
//!
//! - the **header page** (allocated first) stores the root page id
//! - **internal pages** store separator keys and child page ids; the first
//!   entry's key slot mirrors the separator above the page and is ignored
//!   by lookups
//! - **leaf pages** store key/record-id pairs and are forward-linked in key
//!   order
//!
//! A single tree-wide reader/writer latch serializes operations: lookups
//! and scans share it, inserts and deletes take it exclusively. Within an
//! operation the buffer pool provides page residency via pin counts.
//!
//! [`RecordId`]: quarry_common::RecordId

mod config;
mod error;
mod internal;
mod iter;
mod leaf;
mod page;
mod tree;

pub use config::BPlusTreeConfig;
pub use error::{IndexError, IndexResult};
pub use internal::{InternalPage, InternalPageMut};
pub use iter::TreeIter;
pub use leaf::{LeafPage, LeafPageMut};
pub use page::{HeaderPage, HeaderPageMut, TreePageType};
pub use tree::BPlusTree;
