//! # Threading Configuration
//!
//! Rayon thread pool construction for the cluster fan-out.

use crate::error::{QuantError, Result};

/// Create a configured thread pool. Zero threads means one worker per
/// core.
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("graphquant-worker-{}", i))
        .build()
        .map_err(|err| QuantError::Config {
            message: format!("failed to create thread pool: {}", err),
        })
}
