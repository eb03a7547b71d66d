//! Core types for QuarryDB.

mod ids;
mod rid;

pub use ids::{PageId, TableOid, TxnId};
pub use rid::RecordId;
