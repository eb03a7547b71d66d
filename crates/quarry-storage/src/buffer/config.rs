//! Buffer pool configuration.

use quarry_common::{DEFAULT_POOL_SIZE, DEFAULT_REPLACER_K};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of page frames in the pool.
    pub pool_size: usize,
    /// History depth `k` for the LRU-K replacer.
    pub replacer_k: usize,
}

impl BufferPoolConfig {
    /// Creates a configuration with the given number of frames and the
    /// default replacer depth.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }

    /// Sets the LRU-K history depth.
    pub fn with_replacer_k(mut self, replacer_k: usize) -> Self {
        self.replacer_k = replacer_k;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0");
        }
        if self.replacer_k == 0 {
            return Err("replacer_k must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = BufferPoolConfig::new(16);
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.replacer_k, DEFAULT_REPLACER_K);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BufferPoolConfig::new(8).with_replacer_k(3);
        assert_eq!(config.replacer_k, 3);
    }

    #[test]
    fn test_validation() {
        assert!(BufferPoolConfig::new(0).validate().is_err());
        assert!(BufferPoolConfig::new(4).with_replacer_k(0).validate().is_err());
    }
}
