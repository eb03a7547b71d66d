//! # quarry-txn
//!
//! Transaction management for QuarryDB.
//!
//! This crate provides the concurrency-control half of the engine core:
//!
//! - **Transactions**: lifecycle state machine (growing, shrinking,
//!   committed, aborted), isolation levels, held-lock bookkeeping, and the
//!   write sets used for rollback
//! - **Lock manager**: hierarchical table/row locking with five modes
//!   (IS, IX, S, SIX, X), FIFO wait queues, lock upgrades, and
//!   isolation-level policing
//! - **Deadlock detection**: a background thread that rebuilds the
//!   wait-for graph at a fixed interval and aborts the youngest
//!   transaction on any cycle
//! - **Transaction manager**: begin/commit/abort, with abort undoing index
//!   changes recorded in the transaction's write set
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     TransactionManager                       │
//! │        begin() ─── commit() ─── abort() + undo               │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────▼───────────────────────────────┐
//! │                        LockManager                           │
//! │  table queues ──── row queues ──── upgrade tracking          │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │   deadlock detector (background thread)                │  │
//! │  │   wait-for graph → cycle → abort youngest → wake       │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Deadlock detection via wait-for graph analysis
pub mod deadlock;

/// Hierarchical lock manager
pub mod lock;

/// Transaction lifecycle coordination
pub mod manager;

/// Transaction state, isolation levels, and write sets
pub mod transaction;

// Re-export commonly used types

pub use deadlock::WaitForGraph;
pub use lock::{LockManager, LockManagerConfig, LockMode};
pub use manager::TransactionManager;
pub use transaction::{
    AbortReason, IndexWriteRecord, IsolationLevel, Transaction, TransactionError,
    TransactionState, TxnResult, WriteOp,
};
