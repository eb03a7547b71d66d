//! # quarry-common
//!
//! Common types and constants for QuarryDB.
//!
//! This crate provides the foundational vocabulary shared by the storage and
//! transaction layers:
//!
//! - **Types**: core identifiers (`PageId`, `TxnId`, `TableOid`) and the
//!   record locator `RecordId`
//! - **Constants**: page geometry and sentinel values
//!
//! ## Example
//!
//! ```rust
//! use quarry_common::types::{PageId, RecordId, TxnId};
//!
//! let page_id = PageId::new(42);
//! let rid = RecordId::new(page_id, 7);
//! let txn_id = TxnId::new(1);
//! assert!(page_id.is_valid() && txn_id.is_valid());
//! assert_eq!(rid.page_id(), page_id);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{PageId, RecordId, TableOid, TxnId};
