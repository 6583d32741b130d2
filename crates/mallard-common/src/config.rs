//! Database configuration.

use crate::error::{Error, Result};
use crate::STANDARD_VECTOR_SIZE;
use std::time::Duration;

/// Default size of a storage block in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 262_144;

/// Width of the widest fixed-width physical type (HUGEINT).
const WIDEST_FIXED_WIDTH: usize = 16;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total number of threads used for query execution, including the
    /// thread driving the query.
    pub threads: usize,

    /// Whether background worker threads may be spawned.
    ///
    /// When false the scheduler falls back to a plain locked queue drained
    /// only by the driving thread.
    pub enable_threads: bool,

    /// Memory limit in bytes for registered in-memory blocks (None for unlimited).
    pub maximum_memory: Option<usize>,

    /// Size of a storage block in bytes.
    pub block_size: usize,

    /// How long an idle worker sleeps on the task semaphore before
    /// re-checking its cancellation marker.
    pub task_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            enable_threads: true,
            maximum_memory: None,
            block_size: DEFAULT_BLOCK_SIZE,
            task_timeout: Duration::from_millis(50),
        }
    }
}

impl Config {
    /// Creates a configuration that executes everything on the calling thread.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            threads: 1,
            enable_threads: false,
            ..Default::default()
        }
    }

    /// Sets the total number of execution threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Enables or disables background worker threads.
    #[must_use]
    pub fn with_enable_threads(mut self, enable: bool) -> Self {
        self.enable_threads = enable;
        self
    }

    /// Sets the memory limit for the buffer manager.
    #[must_use]
    pub fn with_maximum_memory(mut self, bytes: usize) -> Self {
        self.maximum_memory = Some(bytes);
        self
    }

    /// Sets the block size used by storage segments.
    #[must_use]
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the worker idle timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Smallest block that can hold one vector of every fixed-width type.
    pub fn minimum_block_size() -> usize {
        STANDARD_VECTOR_SIZE / 8 + WIDEST_FIXED_WIDTH * STANDARD_VECTOR_SIZE
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("threads must be greater than zero".into()));
        }
        if self.maximum_memory == Some(0) {
            return Err(Error::Config(
                "maximum_memory must be greater than zero".into(),
            ));
        }
        if self.block_size < Self::minimum_block_size() {
            return Err(Error::Config(format!(
                "block_size must be at least {} bytes, got {}",
                Self::minimum_block_size(),
                self.block_size
            )));
        }
        if self.task_timeout.is_zero() {
            return Err(Error::Config("task_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.threads >= 1);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_threads(4)
            .with_maximum_memory(1 << 20)
            .with_task_timeout(Duration::from_millis(5));
        assert_eq!(config.threads, 4);
        assert_eq!(config.maximum_memory, Some(1 << 20));
        assert_eq!(config.task_timeout, Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            Config::default().with_threads(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::default().with_maximum_memory(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::default().with_block_size(1024).validate(),
            Err(Error::Config(_))
        ));
        assert!(Config::default()
            .with_block_size(Config::minimum_block_size())
            .validate()
            .is_ok());
    }

    #[test]
    fn test_single_threaded() {
        let config = Config::single_threaded();
        assert_eq!(config.threads, 1);
        assert!(!config.enable_threads);
    }
}
