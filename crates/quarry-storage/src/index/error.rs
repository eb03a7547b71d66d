//! B+tree errors.

use quarry_common::PageId;
use thiserror::Error;

use crate::buffer::BufferError;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The buffer pool could not serve a page.
    #[error("buffer pool error: {source}")]
    Buffer {
        /// Underlying buffer pool error.
        #[from]
        source: BufferError,
    },

    /// A structural invariant does not hold.
    ///
    /// This is fatal: the tree (or the page image read from disk) is not a
    /// well-formed B+tree.
    #[error("corrupted tree page {page_id}: {reason}")]
    Corrupted {
        /// The offending page.
        page_id: PageId,
        /// Which invariant was violated.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },
}

impl IndexError {
    /// Creates a corruption error.
    pub fn corrupted(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            page_id,
            reason: reason.into(),
        }
    }
}
