//! # quarry-storage
//!
//! Page-oriented storage engine for QuarryDB.
//!
//! This crate implements the transactional substrate the executors run on:
//!
//! - **Disk manager**: a capability trait for fixed-size page I/O, with
//!   file-backed and in-memory implementations
//! - **Buffer pool**: a fixed-capacity page cache with pinning, dirty
//!   tracking, LRU-K eviction, and RAII page guards
//! - **B+tree index**: a disk-backed, order-preserving index mapping
//!   fixed-width keys to record ids
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  BPlusTree                    │
//! │    header page / internal pages / leaf pages  │
//! └───────────────────────┬───────────────────────┘
//!                         │ fetch / unpin
//! ┌───────────────────────▼───────────────────────┐
//! │              BufferPoolManager                │
//! │   page table ── frames ── LRU-K replacer      │
//! └───────────────────────┬───────────────────────┘
//!                         │ read_page / write_page
//! ┌───────────────────────▼───────────────────────┐
//! │                 DiskManager                   │
//! └───────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Buffer pool manager and LRU-K replacer
pub mod buffer;

/// Fixed-size page I/O
pub mod disk;

/// B+tree index over buffer-pooled pages
pub mod index;
