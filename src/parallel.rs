//! Parallel processing configuration
//!
//! File loads are the only parallel work in the pipeline. They run on a
//! dedicated Rayon pool sized by [`ParallelConfig`] instead of the global one,
//! so library callers keep control over their own global pool.

use crate::errors::{Result, WbtsError};
use rayon::ThreadPoolBuilder;

/// Configuration for parallel processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Create a configuration that uses all available CPU cores
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Create a configuration that uses a specific number of threads
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Number of threads `install` will run on
    pub fn effective_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Run `op` inside a pool built from this configuration
    pub fn install<R, F>(&self, op: F) -> Result<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let threads = self.effective_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| {
                WbtsError::ThreadPool(format!(
                    "Failed to initialize thread pool with {threads} threads: {e}"
                ))
            })?;
        Ok(pool.install(op))
    }
}
