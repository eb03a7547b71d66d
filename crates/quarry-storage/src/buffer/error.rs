//! Buffer pool errors.

use std::io;

use thiserror::Error;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every frame is pinned and nothing can be evicted.
    #[error("no free frame available and no frame is evictable")]
    NoFrameAvailable,

    /// I/O error during page read or write-back.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error from the disk manager.
        #[from]
        source: io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if retrying after unpinning pages could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFrameAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(BufferError::NoFrameAvailable.is_retryable());
        assert!(!BufferError::config("bad").is_retryable());
    }
}
