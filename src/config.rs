//! # Bus configuration.
//!
//! Provides [`Config`], the settings used when a root bus has to provision its
//! own executor. Derived buses inherit their parent's executor and reporter and
//! never consult a config.
//!
//! ## Sentinel values
//! - `workers = 0` → direct (caller-thread, synchronous) executor
//!
//! ## Executor selection
//! ```text
//! BusBuilder::with_executor(e) given? ──► e
//!            │ no
//!            ▼
//! cfg.worker_count() == None ──► DirectExecutor
//!            │ Some(n)
//!            ▼
//! tokio runtime available? ──yes──► WorkerPool(n)
//!            │ no
//!            └──► DirectExecutor (warn)
//! ```

use std::sync::Arc;

use crate::executor::{DirectExecutor, Executor, WorkerPool};

/// Worker count used by release builds.
pub const DEFAULT_WORKERS: usize = 4;

/// Settings for provisioning a root bus's executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of pool workers.
    ///
    /// - `0` = direct executor (delivery on the publishing thread)
    /// - `n > 0` = [`WorkerPool`] with `n` workers
    pub workers: usize,
}

impl Config {
    /// Synchronous delivery on the publisher's thread.
    #[must_use]
    pub fn direct() -> Self {
        Self { workers: 0 }
    }

    /// Pool with `workers` workers (`0` still means direct).
    #[must_use]
    pub fn pooled(workers: usize) -> Self {
        Self { workers }
    }

    /// Returns the pool size as an `Option`.
    ///
    /// - `None` → direct executor
    /// - `Some(n)` → pool of `n` workers
    #[inline]
    pub fn worker_count(&self) -> Option<usize> {
        if self.workers == 0 {
            None
        } else {
            Some(self.workers)
        }
    }

    /// Builds the executor described by this config.
    pub(crate) fn build_executor(&self) -> Arc<dyn Executor> {
        let Some(workers) = self.worker_count() else {
            return Arc::new(DirectExecutor);
        };
        match WorkerPool::try_current(workers) {
            Some(pool) => Arc::new(pool),
            None => {
                tracing::warn!(
                    workers,
                    "no tokio runtime available; falling back to direct executor"
                );
                Arc::new(DirectExecutor)
            }
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - debug builds: `workers = 0` (direct executor)
    /// - release builds: `workers = 4`
    fn default() -> Self {
        let workers = if cfg!(debug_assertions) {
            0
        } else {
            DEFAULT_WORKERS
        };
        Self { workers }
    }
}
