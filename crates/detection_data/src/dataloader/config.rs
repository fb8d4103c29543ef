//! src/dataloader/config.rs
//!
//! Configuration for PrefetchLoader behaviour
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .num_workers(4)
//!     .prefetch(2)
//!     .timeout(Duration::from_secs(60))
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: More workers overlap more image decoding and augmentation
//!                  with training, at the cost of memory per in-flight batch
//! - `prefetch`: Batches buffered per worker. The total queue depth is
//!               `num_workers * prefetch`; producers stall once it is reached

use crate::error::GeneratorError;
use anyhow::{ensure, Result};
use std::time::Duration;

/// Configuration for PrefetchLoader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of parallel workers (0 = produce on the consumer thread)
    pub num_workers: usize,
    /// Number of batches buffered per worker (must be > 0 when using workers)
    pub prefetch: usize,
    /// Maximum time the consumer waits for the next batch.
    /// If exceeded, returns an error (assuming workers are stuck). Default: 30s
    pub timeout: Duration,
    /// How often idle workers check for the shutdown signal. Default: 100ms
    pub worker_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            prefetch: 2,
            timeout: Duration::from_secs(30),
            worker_timeout: Duration::from_millis(100),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Total number of batches that may be in flight at once.
    pub fn queue_depth(&self) -> usize {
        self.num_workers.max(1) * self.prefetch
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers > 0 {
            ensure!(
                self.prefetch > 0,
                GeneratorError::config("prefetch must be > 0 when using workers")
            );
        }
        ensure!(
            !self.timeout.is_zero(),
            GeneratorError::config("timeout must be non-zero")
        );
        ensure!(
            !self.worker_timeout.is_zero(),
            GeneratorError::config("worker_timeout must be non-zero")
        );
        Ok(())
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set the number of batches buffered per worker.
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.config.prefetch = prefetch;
        self
    }

    /// Set the timeout for waiting on a batch.
    ///
    /// - Too low: May fail during legitimately heavy augmentation
    /// - Too high: Delays detection of stuck workers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the worker polling interval
    pub fn worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.config.worker_timeout = worker_timeout;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
